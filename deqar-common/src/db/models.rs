//! Database models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Report flag severity
///
/// Ordered `None < Low < High`; a flagging pass only ever raises it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FlagLevel {
    #[default]
    None,
    Low,
    High,
}

impl FlagLevel {
    /// String label for SQL storage
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagLevel::None => "none",
            FlagLevel::Low => "low",
            FlagLevel::High => "high",
        }
    }

    /// Parse from SQL string; unknown labels read as `None`
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "low" => FlagLevel::Low,
            "high" => FlagLevel::High,
            _ => FlagLevel::None,
        }
    }
}

impl fmt::Display for FlagLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "part of obligatory EQA system")]
    Obligatory,
    #[serde(rename = "voluntary")]
    Voluntary,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Obligatory => "part of obligatory EQA system",
            ReportStatus::Voluntary => "voluntary",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "part of obligatory eqa system" | "obligatory" => Ok(ReportStatus::Obligatory),
            "voluntary" => Ok(ReportStatus::Voluntary),
            other => Err(format!("Unknown report status [{}]", other)),
        }
    }
}

/// Report decision vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportDecision {
    #[serde(rename = "positive")]
    Positive,
    #[serde(rename = "positive with conditions or restrictions")]
    PositiveWithConditions,
    #[serde(rename = "negative")]
    Negative,
    #[serde(rename = "not applicable")]
    NotApplicable,
}

impl ReportDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportDecision::Positive => "positive",
            ReportDecision::PositiveWithConditions => "positive with conditions or restrictions",
            ReportDecision::Negative => "negative",
            ReportDecision::NotApplicable => "not applicable",
        }
    }
}

impl FromStr for ReportDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(ReportDecision::Positive),
            "positive with conditions or restrictions" => {
                Ok(ReportDecision::PositiveWithConditions)
            }
            "negative" => Ok(ReportDecision::Negative),
            "not applicable" => Ok(ReportDecision::NotApplicable),
            other => Err(format!("Unknown report decision [{}]", other)),
        }
    }
}

/// Country reference row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Country {
    pub id: i64,
    pub iso_3166_alpha2: String,
    pub name_english: String,
    pub ehea_is_member: bool,
}

/// QF-EHEA level reference row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QfEheaLevel {
    pub id: i64,
    pub code: i64,
    pub level: String,
}

/// Quality assurance agency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agency {
    pub id: i64,
    pub acronym_primary: String,
    pub name_primary: String,
}

/// Declared (or inferred) territorial remit of an agency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgencyFocusCountry {
    pub id: i64,
    pub agency_id: i64,
    pub country_id: i64,
    pub country_is_official: bool,
    pub country_is_crossborder: bool,
}

/// Report activity vocabulary row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    pub id: i64,
    pub activity: String,
    pub activity_type: String,
}

/// Canonical institution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Institution {
    pub id: i64,
    pub deqar_id: Option<String>,
    pub eter_id: Option<String>,
    pub name_primary: String,
    pub name_sort: String,
    pub website_link: Option<String>,
}

/// Time-scoped official name record (current when `valid_to` is NULL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstitutionName {
    pub id: i64,
    pub institution_id: i64,
    pub name_official: Option<String>,
    pub name_official_transliterated: Option<String>,
    pub name_english: Option<String>,
    pub acronym: Option<String>,
    pub name_source_note: Option<String>,
    pub valid_to: Option<String>,
}

/// Alternate form of an institution name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstitutionNameVersion {
    pub id: i64,
    pub institution_name_id: i64,
    pub name: String,
    pub transliteration: Option<String>,
    pub name_version_source_note: Option<String>,
}

/// External identifier of an institution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstitutionIdentifier {
    pub id: i64,
    pub institution_id: i64,
    pub identifier: String,
    pub agency_id: Option<i64>,
    pub resource: Option<String>,
    pub identifier_source_note: Option<String>,
}

/// Location of an institution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstitutionCountry {
    pub id: i64,
    pub institution_id: i64,
    pub country_id: i64,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub country_source_note: Option<String>,
    pub country_verified: bool,
}

/// Qualification framework scope of an institution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstitutionQfEheaLevel {
    pub id: i64,
    pub institution_id: i64,
    pub qf_ehea_level_id: i64,
    pub qf_ehea_level_source_note: Option<String>,
    pub qf_ehea_level_verified: bool,
}

/// ETER/OrgReg reference record not necessarily linked to an institution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReferenceInstitution {
    pub eter_id: String,
    pub name_official: String,
    pub name_english: Option<String>,
    pub acronym: Option<String>,
    pub website_link: Option<String>,
    pub country_id: Option<i64>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
}

/// One submitted accreditation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: i64,
    pub agency_id: i64,
    pub local_identifier: Option<String>,
    pub status: String,
    pub decision: String,
    pub valid_from: String,
    pub valid_to: Option<String>,
    pub flag_level: String,
    pub other_comment: Option<String>,
}

impl Report {
    pub fn flag(&self) -> FlagLevel {
        FlagLevel::from_str_lossy(&self.flag_level)
    }
}

/// Report file metadata; `file_path` is set once the file is stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportFile {
    pub id: i64,
    pub report_id: i64,
    pub file_display_name: Option<String>,
    pub file_original_location: Option<String>,
    pub file_path: Option<String>,
    pub languages: String,
}

/// Raised concern on a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportFlag {
    pub id: i64,
    pub report_id: i64,
    pub flag: String,
    pub flag_message: String,
    pub active: bool,
    pub removed_by_eqar: bool,
}

impl ReportFlag {
    pub fn level(&self) -> FlagLevel {
        FlagLevel::from_str_lossy(&self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_level_ordering() {
        assert!(FlagLevel::None < FlagLevel::Low);
        assert!(FlagLevel::Low < FlagLevel::High);
        assert_eq!(FlagLevel::Low.max(FlagLevel::High), FlagLevel::High);
        assert_eq!(FlagLevel::High.max(FlagLevel::Low), FlagLevel::High);
    }

    #[test]
    fn test_flag_level_storage_labels() {
        for level in [FlagLevel::None, FlagLevel::Low, FlagLevel::High] {
            assert_eq!(FlagLevel::from_str_lossy(level.as_str()), level);
        }
        assert_eq!(FlagLevel::from_str_lossy("bogus"), FlagLevel::None);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "Part of obligatory EQA system".parse::<ReportStatus>(),
            Ok(ReportStatus::Obligatory)
        );
        assert_eq!("voluntary".parse::<ReportStatus>(), Ok(ReportStatus::Voluntary));
        assert!("mandatory".parse::<ReportStatus>().is_err());
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!(
            "positive with conditions or restrictions".parse::<ReportDecision>(),
            Ok(ReportDecision::PositiveWithConditions)
        );
        assert!("maybe".parse::<ReportDecision>().is_err());
    }
}

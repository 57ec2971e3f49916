//! Submission payload types
//!
//! These mirror the structure handed over by the JSON/CSV flattening layer.
//! Field-level type and format checks happen there; everything here is
//! normalized against the registry in [`crate::validation`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference key given either as a name or a numeric id
///
/// Agencies, activities and QF-EHEA levels may be submitted as
/// `"ACQUIN"` or `12`, `"first cycle"` or `1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LookupKey {
    Number(i64),
    Text(String),
}

impl LookupKey {
    /// Key as a lookup string (numbers are formatted, text is trimmed)
    pub fn as_lookup(&self) -> String {
        match self {
            LookupKey::Number(n) => n.to_string(),
            LookupKey::Text(s) => s.trim().to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, LookupKey::Text(s) if s.trim().is_empty())
    }
}

impl Default for LookupKey {
    fn default() -> Self {
        LookupKey::Text(String::new())
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_lookup())
    }
}

impl From<&str> for LookupKey {
    fn from(value: &str) -> Self {
        LookupKey::Text(value.to_string())
    }
}

/// External identifier submitted for an institution
///
/// A missing resource means an identifier local to the submitting agency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierPayload {
    pub identifier: String,
    pub resource: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlternativeNamePayload {
    pub name: String,
    pub transliteration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationPayload {
    pub country: String,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Institution (or platform) referenced by a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstitutionPayload {
    pub deqar_id: Option<String>,
    pub eter_id: Option<String>,
    pub identifiers: Vec<IdentifierPayload>,
    pub name_official: Option<String>,
    pub name_official_transliterated: Option<String>,
    pub name_english: Option<String>,
    pub acronym: Option<String>,
    pub alternative_names: Vec<AlternativeNamePayload>,
    pub locations: Vec<LocationPayload>,
    pub qf_ehea_levels: Vec<LookupKey>,
    pub website_link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgrammeNamePayload {
    pub name: String,
    pub qualification: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgrammePayload {
    pub name_primary: String,
    pub qualification_primary: Option<String>,
    pub alternative_names: Vec<ProgrammeNamePayload>,
    pub qf_ehea_level: Option<LookupKey>,
    pub nqf_level: Option<String>,
    pub degree_outcome: Option<String>,
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportLinkPayload {
    pub link: String,
    pub link_display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportFilePayload {
    pub display_name: Option<String>,
    pub original_location: Option<String>,
    pub report_language: Vec<String>,
}

/// One report submission unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionPayload {
    pub report_id: Option<i64>,
    pub agency: LookupKey,
    pub local_identifier: Option<String>,
    pub activities: Vec<LookupKey>,
    pub status: String,
    pub decision: String,
    pub valid_from: String,
    pub valid_to: Option<String>,
    pub institutions: Vec<InstitutionPayload>,
    pub platforms: Vec<InstitutionPayload>,
    pub programmes: Vec<ProgrammePayload>,
    pub report_links: Vec<ReportLinkPayload>,
    pub report_files: Vec<ReportFilePayload>,
    pub other_comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_keys_accept_names_and_numbers() {
        let payload: SubmissionPayload = serde_json::from_value(json!({
            "agency": 7,
            "activities": ["institutional audit", 3],
            "status": "voluntary",
            "decision": "positive",
            "valid_from": "2020-01-01",
            "institutions": [{ "deqar_id": "DEQARINST0001", "qf_ehea_levels": [1, "second cycle"] }]
        }))
        .unwrap();

        assert_eq!(payload.agency, LookupKey::Number(7));
        assert_eq!(payload.agency.as_lookup(), "7");
        assert_eq!(
            payload.activities,
            vec![LookupKey::from("institutional audit"), LookupKey::Number(3)]
        );
        assert_eq!(payload.institutions[0].qf_ehea_levels[1].as_lookup(), "second cycle");
        assert!(payload.programmes.is_empty());
        assert!(payload.valid_to.is_none());
    }

    #[test]
    fn test_blank_lookup_key() {
        assert!(LookupKey::default().is_blank());
        assert!(LookupKey::from("  ").is_blank());
        assert!(!LookupKey::Number(0).is_blank());
    }
}

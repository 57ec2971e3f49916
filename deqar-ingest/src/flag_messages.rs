//! Flag message catalog
//!
//! Pure formatter turning a template key, the submitted value and the
//! submitting agency into a human-readable provenance or flag message.
//! A [`FlagMessages`] accumulator is built per submission unit, so no
//! template state is shared between units.

use chrono::NaiveDate;
use deqar_common::db::FlagLevel;
use serde::{Deserialize, Serialize};

/// Message template key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagTemplate {
    // Provenance notes
    InstitutionCreated,
    InstitutionCreatedFromReference,
    OfficialNameFilled,
    EnglishNameFilled,
    AcronymFilled,
    AlternativeNameAdded,
    WebsiteFilled,
    IdentifierAdded,
    CityFilled,
    QfEheaLevelAdded,

    // Reconciliation conflicts
    OfficialNameConflict,
    EnglishNameConflict,
    AcronymConflict,
    IdentifierConflict,
    CityConflict,
    CountryAdded,
    CountryNotVerified,
    QfEheaLevelUnverified,
    QfEheaLevelNotVerified,

    // Report rules
    FocusCountryAdded,
    FocusCountryNotOfficial,
    ProgrammeCountryNotInInstitution,
    ProgrammeLevelNotInInstitution,
    ReportFileMissing,
    ReportValidityExpired,
    EheaLevelsMissing,
}

impl FlagTemplate {
    /// Severity a message of this template escalates to
    pub fn level(&self) -> FlagLevel {
        use FlagTemplate::*;
        match self {
            InstitutionCreated
            | InstitutionCreatedFromReference
            | OfficialNameFilled
            | EnglishNameFilled
            | AcronymFilled
            | AlternativeNameAdded
            | WebsiteFilled
            | IdentifierAdded
            | CityFilled
            | QfEheaLevelAdded => FlagLevel::None,

            OfficialNameConflict
            | EnglishNameConflict
            | AcronymConflict
            | IdentifierConflict
            | CityConflict
            | CountryAdded
            | CountryNotVerified
            | QfEheaLevelUnverified
            | QfEheaLevelNotVerified
            | FocusCountryAdded
            | ProgrammeCountryNotInInstitution
            | ReportFileMissing
            | ReportValidityExpired
            | EheaLevelsMissing => FlagLevel::Low,

            FocusCountryNotOfficial | ProgrammeLevelNotInInstitution => FlagLevel::High,
        }
    }
}

/// Render a template
pub fn render(template: FlagTemplate, value: &str, agency: &str) -> String {
    use FlagTemplate::*;
    match template {
        InstitutionCreated => format!("Institution [{}] was created from data submitted by {}.", value, agency),
        InstitutionCreatedFromReference => format!(
            "Institution was created from ETER/OrgReg record [{}] matched in a submission by {}.",
            value, agency
        ),
        OfficialNameFilled => format!("Official name [{}] was added by {}.", value, agency),
        EnglishNameFilled => format!("English name [{}] was added by {}.", value, agency),
        AcronymFilled => format!("Acronym [{}] was added by {}.", value, agency),
        AlternativeNameAdded => format!("Alternative name [{}] was added by {}.", value, agency),
        WebsiteFilled => format!("Website [{}] was added by {}.", value, agency),
        IdentifierAdded => format!("Identifier [{}] was added by {}.", value, agency),
        CityFilled => format!("City [{}] was added by {}.", value, agency),
        QfEheaLevelAdded => format!("QF-EHEA level [{}] was added by {}.", value, agency),

        OfficialNameConflict => format!(
            "Official name [{}] submitted by {} differs from the recorded official name; it was added as an alternative name.",
            value, agency
        ),
        EnglishNameConflict => format!(
            "English name [{}] submitted by {} differs from the recorded English name; it was added as an alternative name.",
            value, agency
        ),
        AcronymConflict => format!(
            "Acronym [{}] submitted by {} differs from the recorded acronym; it was added as an alternative name.",
            value, agency
        ),
        IdentifierConflict => format!(
            "Identifier [{}] submitted by {} differs from the recorded identifier of the same resource; the recorded one was kept.",
            value, agency
        ),
        CityConflict => format!(
            "City [{}] submitted by {} differs from the recorded city; the recorded city was kept.",
            value, agency
        ),
        CountryAdded => format!(
            "Country [{}] was added to the institution by {} and awaits verification.",
            value, agency
        ),
        CountryNotVerified => format!(
            "Country [{}] submitted by {} is recorded for the institution but not yet verified.",
            value, agency
        ),
        QfEheaLevelUnverified => format!(
            "QF-EHEA level [{}] was added to the institution by {} and awaits verification.",
            value, agency
        ),
        QfEheaLevelNotVerified => format!(
            "QF-EHEA level [{}] submitted by {} is recorded for the institution but not yet verified.",
            value, agency
        ),

        FocusCountryAdded => format!(
            "Country [{}] was not among the focus countries of {}; it was added as a cross-border country.",
            value, agency
        ),
        FocusCountryNotOfficial => format!(
            "{} does not have official status in [{}], yet the report is part of the obligatory EQA system.",
            agency, value
        ),
        ProgrammeCountryNotInInstitution => format!(
            "Programme country [{}] is not among the countries of the institutions in the report.",
            value
        ),
        ProgrammeLevelNotInInstitution => format!(
            "QF-EHEA level [{}] of a programme is not among the verified levels of the institutions in the report.",
            value
        ),
        ReportFileMissing => format!(
            "Report file [{}] has neither an uploaded file nor a source location.",
            value
        ),
        ReportValidityExpired => format!(
            "Report is valid from [{}] without an end date and is older than six years.",
            value
        ),
        EheaLevelsMissing => format!(
            "Institution [{}] is located in an EHEA member country but has no QF-EHEA levels.",
            value
        ),
    }
}

/// One entry of an institution or report log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: FlagLevel,
    pub message: String,
}

/// Per-unit message accumulator
///
/// Every formatted message is also recorded, in order, for the audit log.
#[derive(Debug, Clone)]
pub struct FlagMessages {
    agency: String,
    date: NaiveDate,
    entries: Vec<LogEntry>,
}

impl FlagMessages {
    pub fn new(agency: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            agency: agency.into(),
            date,
            entries: Vec::new(),
        }
    }

    /// Format a message and append it to the log
    pub fn note(&mut self, template: FlagTemplate, value: &str) -> String {
        let message = render(template, value, &self.agency);
        self.entries.push(LogEntry {
            level: template.level(),
            message: message.clone(),
        });
        message
    }

    /// Provenance note stored on the row a submission filled in
    pub fn source_note(&self) -> String {
        format!("Populated by {} on {}", self.agency, self.date.format("%Y-%m-%d"))
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Remove and return everything logged so far
    pub fn take_entries(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }
}

//! Submission normalization
//!
//! Resolves every reference-vocabulary key of a payload (agency, activities,
//! countries, QF-EHEA levels, identifier resources) and checks the report
//! fields before anything is written. All problems of a unit are collected
//! and reported together as one validation error.

use crate::error::{IngestError, IngestResult};
use crate::types::{
    AlternativeNamePayload, IdentifierPayload, InstitutionPayload, ProgrammeNamePayload,
    ProgrammePayload, ReportFilePayload, ReportLinkPayload, SubmissionPayload,
};
use chrono::NaiveDate;
use deqar_common::db::models::{Agency, Country, QfEheaLevel, ReportDecision, ReportStatus};
use deqar_common::db::reference::{
    find_activity, find_agency, find_country, find_identifier_resource, find_qf_ehea_level,
    LOCAL_IDENTIFIER_RESOURCE,
};
use deqar_common::time::parse_date;
use sqlx::SqliteConnection;

/// Identifier with its resource and scope resolved
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedIdentifier {
    pub identifier: String,
    /// Canonical resource spelling
    pub resource: String,
    /// Owning agency for agency-scoped (local) identifiers, `None` for global ones
    pub agency_id: Option<i64>,
}

impl PreparedIdentifier {
    pub fn is_local(&self) -> bool {
        self.agency_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedLocation {
    pub country: Country,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Institution or platform with all vocabulary resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedInstitution {
    pub deqar_id: Option<String>,
    pub eter_id: Option<String>,
    pub identifiers: Vec<PreparedIdentifier>,
    pub name_official: Option<String>,
    pub name_official_transliterated: Option<String>,
    pub name_english: Option<String>,
    pub acronym: Option<String>,
    pub alternative_names: Vec<AlternativeNamePayload>,
    pub locations: Vec<PreparedLocation>,
    pub qf_ehea_levels: Vec<QfEheaLevel>,
    pub website_link: Option<String>,
}

impl PreparedInstitution {
    /// Short human label used in log messages
    pub fn label(&self) -> String {
        self.deqar_id
            .clone()
            .or_else(|| self.name_official.clone())
            .or_else(|| self.name_english.clone())
            .or_else(|| self.eter_id.clone())
            .or_else(|| self.identifiers.first().map(|i| i.identifier.clone()))
            .or_else(|| self.website_link.clone())
            .unwrap_or_else(|| "unnamed institution".to_string())
    }

    /// Official and English names, whichever were submitted
    pub fn names(&self) -> Vec<&str> {
        [self.name_official.as_deref(), self.name_english.as_deref()]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedProgramme {
    pub name_primary: String,
    pub qualification_primary: Option<String>,
    pub alternative_names: Vec<ProgrammeNamePayload>,
    pub qf_ehea_level: Option<QfEheaLevel>,
    pub nqf_level: Option<String>,
    pub degree_outcome: Option<String>,
    pub countries: Vec<Country>,
}

/// Submission unit ready to be applied
#[derive(Debug, Clone)]
pub struct PreparedSubmission {
    pub report_id: Option<i64>,
    pub agency: Agency,
    pub local_identifier: Option<String>,
    pub activity_ids: Vec<i64>,
    pub status: ReportStatus,
    pub decision: ReportDecision,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub institutions: Vec<PreparedInstitution>,
    pub platforms: Vec<PreparedInstitution>,
    pub programmes: Vec<PreparedProgramme>,
    pub report_links: Vec<ReportLinkPayload>,
    pub report_files: Vec<ReportFilePayload>,
    pub other_comment: Option<String>,
}

/// Trimmed value, `None` when absent or blank
pub fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalize a submission against the registry vocabulary
pub async fn prepare(
    conn: &mut SqliteConnection,
    payload: &SubmissionPayload,
) -> IngestResult<PreparedSubmission> {
    let mut errors = Vec::new();

    let agency = if payload.agency.is_blank() {
        errors.push("agency: missing".to_string());
        None
    } else {
        let found = find_agency(conn, &payload.agency.as_lookup()).await?;
        if found.is_none() {
            errors.push(format!("agency: unknown agency [{}]", payload.agency));
        }
        found
    };
    let agency_id = agency.as_ref().map(|a| a.id);

    let mut activity_ids = Vec::new();
    for key in &payload.activities {
        match find_activity(conn, &key.as_lookup()).await? {
            Some(activity) if !activity_ids.contains(&activity.id) => activity_ids.push(activity.id),
            Some(_) => {}
            None => errors.push(format!("activities: unknown activity [{}]", key)),
        }
    }

    let status = match payload.status.parse::<ReportStatus>() {
        Ok(status) => Some(status),
        Err(e) => {
            errors.push(format!("status: {}", e));
            None
        }
    };
    let decision = match payload.decision.parse::<ReportDecision>() {
        Ok(decision) => Some(decision),
        Err(e) => {
            errors.push(format!("decision: {}", e));
            None
        }
    };

    let valid_from = parse_date(&payload.valid_from);
    if valid_from.is_none() {
        errors.push(format!(
            "valid_from: [{}] is not a YYYY-MM-DD date",
            payload.valid_from
        ));
    }
    let valid_to = match clean(payload.valid_to.as_deref()) {
        Some(raw) => {
            let parsed = parse_date(&raw);
            if parsed.is_none() {
                errors.push(format!("valid_to: [{}] is not a YYYY-MM-DD date", raw));
            }
            parsed
        }
        None => None,
    };
    if let (Some(from), Some(to)) = (valid_from, valid_to) {
        if to < from {
            errors.push(format!("valid_to: {} is before valid_from {}", to, from));
        }
    }

    if payload.institutions.is_empty() && payload.platforms.is_empty() {
        errors.push("institutions: at least one institution or platform is required".to_string());
    }

    let mut institutions = Vec::with_capacity(payload.institutions.len());
    for (index, institution) in payload.institutions.iter().enumerate() {
        let field = format!("institutions[{}]", index);
        institutions.push(prepare_institution(conn, institution, agency_id, &field, &mut errors).await?);
    }

    let mut platforms = Vec::with_capacity(payload.platforms.len());
    for (index, platform) in payload.platforms.iter().enumerate() {
        let field = format!("platforms[{}]", index);
        platforms.push(prepare_institution(conn, platform, agency_id, &field, &mut errors).await?);
    }

    let mut programmes = Vec::with_capacity(payload.programmes.len());
    for (index, programme) in payload.programmes.iter().enumerate() {
        let field = format!("programmes[{}]", index);
        if let Some(prepared) = prepare_programme(conn, programme, &field, &mut errors).await? {
            programmes.push(prepared);
        }
    }

    let report_links = payload
        .report_links
        .iter()
        .filter(|l| !l.link.trim().is_empty())
        .map(|l| ReportLinkPayload {
            link: l.link.trim().to_string(),
            link_display_name: clean(l.link_display_name.as_deref()),
        })
        .collect();

    let report_files = payload
        .report_files
        .iter()
        .map(|f| ReportFilePayload {
            display_name: clean(f.display_name.as_deref()),
            original_location: clean(f.original_location.as_deref()),
            report_language: f.report_language.clone(),
        })
        .collect();

    match (agency, status, decision, valid_from) {
        (Some(agency), Some(status), Some(decision), Some(valid_from)) if errors.is_empty() => {
            Ok(PreparedSubmission {
                report_id: payload.report_id,
                agency,
                local_identifier: clean(payload.local_identifier.as_deref()),
                activity_ids,
                status,
                decision,
                valid_from,
                valid_to,
                institutions,
                platforms,
                programmes,
                report_links,
                report_files,
                other_comment: clean(payload.other_comment.as_deref()),
            })
        }
        _ => Err(IngestError::validation(errors.join("; "))),
    }
}

async fn prepare_institution(
    conn: &mut SqliteConnection,
    payload: &InstitutionPayload,
    agency_id: Option<i64>,
    field: &str,
    errors: &mut Vec<String>,
) -> IngestResult<PreparedInstitution> {
    let mut prepared = PreparedInstitution {
        deqar_id: clean(payload.deqar_id.as_deref()).map(|id| id.to_uppercase()),
        eter_id: clean(payload.eter_id.as_deref()),
        name_official: clean(payload.name_official.as_deref()),
        name_official_transliterated: clean(payload.name_official_transliterated.as_deref()),
        name_english: clean(payload.name_english.as_deref()),
        acronym: clean(payload.acronym.as_deref()),
        website_link: clean(payload.website_link.as_deref()),
        ..Default::default()
    };

    let mut local_count = 0;
    for identifier in &payload.identifiers {
        match prepare_identifier(conn, identifier, agency_id).await? {
            Ok(Some(prepared_identifier)) => {
                if prepared_identifier.is_local() {
                    local_count += 1;
                }
                prepared.identifiers.push(prepared_identifier);
            }
            Ok(None) => {}
            Err(message) => errors.push(format!("{}.identifiers: {}", field, message)),
        }
    }
    if local_count > 1 {
        errors.push(format!(
            "{}.identifiers: at most one local identifier may be submitted per institution",
            field
        ));
    }

    prepared.alternative_names = payload
        .alternative_names
        .iter()
        .filter(|n| !n.name.trim().is_empty())
        .map(|n| AlternativeNamePayload {
            name: n.name.trim().to_string(),
            transliteration: clean(n.transliteration.as_deref()),
        })
        .collect();

    for location in &payload.locations {
        match find_country(conn, &location.country).await? {
            Some(country) => prepared.locations.push(PreparedLocation {
                country,
                city: clean(location.city.as_deref()),
                latitude: location.latitude,
                longitude: location.longitude,
            }),
            None => errors.push(format!(
                "{}.locations: unknown country [{}]",
                field, location.country
            )),
        }
    }

    for key in &payload.qf_ehea_levels {
        match find_qf_ehea_level(conn, &key.as_lookup()).await? {
            Some(level) if !prepared.qf_ehea_levels.contains(&level) => {
                prepared.qf_ehea_levels.push(level)
            }
            Some(_) => {}
            None => errors.push(format!(
                "{}.qf_ehea_levels: unknown QF-EHEA level [{}]",
                field, key
            )),
        }
    }

    let identifiable = prepared.deqar_id.is_some()
        || prepared.eter_id.is_some()
        || !prepared.identifiers.is_empty()
        || prepared.name_official.is_some()
        || prepared.name_english.is_some()
        || prepared.website_link.is_some();
    if !identifiable {
        errors.push(format!(
            "{}: no DEQAR id, ETER id, identifier, name or website submitted",
            field
        ));
    }

    Ok(prepared)
}

/// Resolve an identifier's resource and scope
///
/// Outer error is a database failure; inner `Err` is a validation message.
async fn prepare_identifier(
    conn: &mut SqliteConnection,
    payload: &IdentifierPayload,
    agency_id: Option<i64>,
) -> IngestResult<Result<Option<PreparedIdentifier>, String>> {
    let identifier = payload.identifier.trim();
    if identifier.is_empty() {
        return Ok(Ok(None));
    }

    let resource = match clean(payload.resource.as_deref()) {
        None => LOCAL_IDENTIFIER_RESOURCE.to_string(),
        Some(raw) => match find_identifier_resource(conn, &raw).await? {
            Some(canonical) => canonical,
            None => return Ok(Err(format!("unknown identifier resource [{}]", raw))),
        },
    };

    let agency_id = if resource == LOCAL_IDENTIFIER_RESOURCE {
        agency_id
    } else {
        None
    };

    Ok(Ok(Some(PreparedIdentifier {
        identifier: identifier.to_string(),
        resource,
        agency_id,
    })))
}

async fn prepare_programme(
    conn: &mut SqliteConnection,
    payload: &ProgrammePayload,
    field: &str,
    errors: &mut Vec<String>,
) -> IngestResult<Option<PreparedProgramme>> {
    let name_primary = payload.name_primary.trim();
    if name_primary.is_empty() {
        errors.push(format!("{}.name_primary: missing", field));
    }

    let qf_ehea_level = match &payload.qf_ehea_level {
        Some(key) if !key.is_blank() => {
            let found = find_qf_ehea_level(conn, &key.as_lookup()).await?;
            if found.is_none() {
                errors.push(format!("{}.qf_ehea_level: unknown QF-EHEA level [{}]", field, key));
            }
            found
        }
        _ => None,
    };

    let mut countries: Vec<Country> = Vec::new();
    for code in &payload.countries {
        match find_country(conn, code).await? {
            Some(country) if !countries.iter().any(|c| c.id == country.id) => countries.push(country),
            Some(_) => {}
            None => errors.push(format!("{}.countries: unknown country [{}]", field, code)),
        }
    }

    if name_primary.is_empty() {
        return Ok(None);
    }

    Ok(Some(PreparedProgramme {
        name_primary: name_primary.to_string(),
        qualification_primary: clean(payload.qualification_primary.as_deref()),
        alternative_names: payload
            .alternative_names
            .iter()
            .filter(|n| !n.name.trim().is_empty())
            .map(|n| ProgrammeNamePayload {
                name: n.name.trim().to_string(),
                qualification: clean(n.qualification.as_deref()),
            })
            .collect(),
        qf_ehea_level,
        nqf_level: clean(payload.nqf_level.as_deref()),
        degree_outcome: clean(payload.degree_outcome.as_deref()),
        countries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_trims_and_drops_blank() {
        assert_eq!(clean(Some("  Graz ")), Some("Graz".to_string()));
        assert_eq!(clean(Some("   ")), None);
        assert_eq!(clean(None), None);
    }

    #[test]
    fn test_label_prefers_deqar_id() {
        let institution = PreparedInstitution {
            deqar_id: Some("DEQARINST0003".to_string()),
            name_official: Some("Universität Wien".to_string()),
            ..Default::default()
        };
        assert_eq!(institution.label(), "DEQARINST0003");

        let unnamed = PreparedInstitution::default();
        assert_eq!(unnamed.label(), "unnamed institution");
    }
}

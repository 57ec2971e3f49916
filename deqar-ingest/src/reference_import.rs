//! Reference data import
//!
//! Loads countries, agencies with their focus countries, activities and
//! ETER/OrgReg reference institutions from a JSON bundle. Every record is
//! upserted, so a bundle can be reloaded after edits. The whole bundle is
//! one transaction: a bad record leaves the database untouched.

use crate::error::{IngestError, IngestResult};
use deqar_common::db::models::ReferenceInstitution;
use deqar_common::db::reference::{
    find_country, upsert_activity, upsert_agency, upsert_country, upsert_focus_country,
    upsert_reference_institution, ReferenceIdentifier,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountryRecord {
    pub iso_3166_alpha2: String,
    pub name_english: String,
    pub ehea_is_member: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusCountryRecord {
    /// ISO code or English name
    pub country: String,
    pub official: bool,
    pub crossborder: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencyRecord {
    pub acronym: String,
    pub name: String,
    pub focus_countries: Vec<FocusCountryRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityRecord {
    pub activity: String,
    pub activity_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceInstitutionRecord {
    pub eter_id: String,
    pub name_official: String,
    pub name_english: Option<String>,
    pub acronym: Option<String>,
    pub website_link: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub identifiers: Vec<ReferenceIdentifier>,
}

/// Reference data file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceBundle {
    pub countries: Vec<CountryRecord>,
    pub agencies: Vec<AgencyRecord>,
    pub activities: Vec<ActivityRecord>,
    pub reference_institutions: Vec<ReferenceInstitutionRecord>,
}

impl ReferenceBundle {
    pub fn from_file(path: &Path) -> IngestResult<Self> {
        let content = std::fs::read_to_string(path).map_err(deqar_common::Error::from)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Counts of records loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub countries: usize,
    pub agencies: usize,
    pub focus_countries: usize,
    pub activities: usize,
    pub reference_institutions: usize,
}

/// Load a reference bundle; countries go first so later records can refer to them
pub async fn load_reference_bundle(pool: &SqlitePool, bundle: &ReferenceBundle) -> IngestResult<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut tx = pool.begin().await?;

    for country in &bundle.countries {
        upsert_country(
            &mut tx,
            &country.iso_3166_alpha2,
            &country.name_english,
            country.ehea_is_member,
        )
        .await?;
        summary.countries += 1;
    }

    for activity in &bundle.activities {
        upsert_activity(&mut tx, &activity.activity, &activity.activity_type).await?;
        summary.activities += 1;
    }

    for agency in &bundle.agencies {
        let agency_id = upsert_agency(&mut tx, &agency.acronym, &agency.name).await?;
        summary.agencies += 1;

        for focus in &agency.focus_countries {
            let country = find_country(&mut tx, &focus.country).await?.ok_or_else(|| {
                IngestError::validation(format!(
                    "agency {}: unknown focus country [{}]",
                    agency.acronym, focus.country
                ))
            })?;
            upsert_focus_country(&mut tx, agency_id, country.id, focus.official, focus.crossborder).await?;
            summary.focus_countries += 1;
        }
    }

    for record in &bundle.reference_institutions {
        let country_id = match &record.country {
            Some(code) => Some(
                find_country(&mut tx, code)
                    .await?
                    .ok_or_else(|| {
                        IngestError::validation(format!(
                            "reference institution {}: unknown country [{}]",
                            record.eter_id, code
                        ))
                    })?
                    .id,
            ),
            None => None,
        };

        let institution = ReferenceInstitution {
            eter_id: record.eter_id.clone(),
            name_official: record.name_official.clone(),
            name_english: record.name_english.clone(),
            acronym: record.acronym.clone(),
            website_link: record.website_link.clone(),
            country_id,
            city: record.city.clone(),
            lat: record.latitude,
            long: record.longitude,
        };
        upsert_reference_institution(&mut tx, &institution, &record.identifiers).await?;
        summary.reference_institutions += 1;
    }

    tx.commit().await?;

    info!(
        countries = summary.countries,
        agencies = summary.agencies,
        focus_countries = summary.focus_countries,
        activities = summary.activities,
        reference_institutions = summary.reference_institutions,
        "Reference data loaded"
    );
    Ok(summary)
}

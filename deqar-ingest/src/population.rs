//! Population Engine
//!
//! Merges a submitted institution into the registry. Existing institutions
//! are reconciled field by field: blank values are filled, differing values
//! never overwrite what is recorded and instead become alternates plus a
//! low-severity log entry. Institutions nothing matched are created
//! straight from the submission.

use crate::db::institutions::{
    self, add_identifier, add_level, add_location, add_name_version, current_name,
    fill_location, fill_name_field, fill_website, identifier_for_scope, institution_levels,
    link_eter_id, location_for_country, refresh_primary_name, NameField, NewInstitution,
    NewLocation,
};
use crate::error::{IngestError, IngestResult};
use crate::flag_messages::{FlagMessages, FlagTemplate};
use crate::resolver::{self, Resolution};
use crate::validation::PreparedInstitution;
use deqar_common::error::is_unique_violation;
use sqlx::SqliteConnection;
use tracing::{debug, info};

/// Institution a submission ended up referencing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledInstitution {
    pub institution_id: i64,
    /// Canonical id when this submission created the institution
    pub created_deqar_id: Option<String>,
}

/// Resolve a submitted institution and merge its data
pub async fn reconcile_institution(
    conn: &mut SqliteConnection,
    institution: &PreparedInstitution,
    messages: &mut FlagMessages,
) -> IngestResult<ReconciledInstitution> {
    match resolver::resolve(conn, institution, messages).await? {
        Resolution::Existing(institution_id) => {
            populate_existing(conn, institution_id, institution, messages).await?;
            Ok(ReconciledInstitution {
                institution_id,
                created_deqar_id: None,
            })
        }
        Resolution::CreatedFromReference {
            institution_id,
            deqar_id,
            ..
        } => {
            // Reference data came first; the submission is reconciled on top of it
            populate_existing(conn, institution_id, institution, messages).await?;
            Ok(ReconciledInstitution {
                institution_id,
                created_deqar_id: Some(deqar_id),
            })
        }
        Resolution::NotFound => {
            let (institution_id, deqar_id) = create_institution(conn, institution, messages).await?;
            Ok(ReconciledInstitution {
                institution_id,
                created_deqar_id: Some(deqar_id),
            })
        }
    }
}

/// Reconcile submitted data with an existing institution
pub async fn populate_existing(
    conn: &mut SqliteConnection,
    institution_id: i64,
    institution: &PreparedInstitution,
    messages: &mut FlagMessages,
) -> IngestResult<()> {
    let note = messages.source_note();

    populate_names(conn, institution_id, institution, messages, &note).await?;

    if let Some(website) = &institution.website_link {
        if fill_website(conn, institution_id, website).await? {
            messages.note(FlagTemplate::WebsiteFilled, website);
        }
    }

    if let Some(eter_id) = &institution.eter_id {
        match link_eter_id(conn, institution_id, eter_id).await {
            Ok(true) => debug!(institution_id, eter_id = %eter_id, "Linked ETER id"),
            Ok(false) => {}
            Err(IngestError::Database(e)) if is_unique_violation(&e) => {
                debug!(institution_id, eter_id = %eter_id, "ETER id already linked elsewhere");
            }
            Err(e) => return Err(e),
        }
    }

    populate_identifiers(conn, institution_id, institution, messages, &note).await?;
    populate_locations(conn, institution_id, institution, messages, &note).await?;
    populate_levels(conn, institution_id, institution, messages, &note).await?;

    Ok(())
}

async fn populate_names(
    conn: &mut SqliteConnection,
    institution_id: i64,
    institution: &PreparedInstitution,
    messages: &mut FlagMessages,
    note: &str,
) -> IngestResult<()> {
    let name = match current_name(conn, institution_id).await? {
        Some(name) => name,
        None => institutions::insert_empty_name(conn, institution_id, note).await?,
    };

    let fields = [
        (
            NameField::Official,
            institution.name_official.as_deref(),
            institution.name_official_transliterated.as_deref(),
            FlagTemplate::OfficialNameFilled,
            FlagTemplate::OfficialNameConflict,
        ),
        (
            NameField::English,
            institution.name_english.as_deref(),
            None,
            FlagTemplate::EnglishNameFilled,
            FlagTemplate::EnglishNameConflict,
        ),
        (
            NameField::Acronym,
            institution.acronym.as_deref(),
            None,
            FlagTemplate::AcronymFilled,
            FlagTemplate::AcronymConflict,
        ),
    ];

    let mut filled_any = false;
    for (field, submitted, transliteration, filled, conflict) in fields {
        let Some(submitted) = submitted else {
            continue;
        };
        match field.value(&name) {
            None => {
                if fill_name_field(conn, name.id, field, submitted, note).await? {
                    messages.note(filled, submitted);
                    filled_any = true;
                }
            }
            Some(recorded) if recorded == submitted => {}
            Some(_) => {
                add_name_version(conn, name.id, submitted, transliteration, note).await?;
                messages.note(conflict, submitted);
            }
        }
    }

    if let Some(transliterated) = institution.name_official_transliterated.as_deref() {
        let same_official = NameField::Official
            .value(&name)
            .map_or(true, |recorded| Some(recorded) == institution.name_official.as_deref());
        if NameField::OfficialTransliterated.value(&name).is_none() && same_official {
            fill_name_field(conn, name.id, NameField::OfficialTransliterated, transliterated, note)
                .await?;
        }
    }

    for alternative in &institution.alternative_names {
        if add_name_version(
            conn,
            name.id,
            &alternative.name,
            alternative.transliteration.as_deref(),
            note,
        )
        .await?
        {
            messages.note(FlagTemplate::AlternativeNameAdded, &alternative.name);
        }
    }

    if filled_any {
        refresh_primary_name(conn, institution_id).await?;
    }
    Ok(())
}

async fn populate_identifiers(
    conn: &mut SqliteConnection,
    institution_id: i64,
    institution: &PreparedInstitution,
    messages: &mut FlagMessages,
    note: &str,
) -> IngestResult<()> {
    for identifier in &institution.identifiers {
        let recorded =
            identifier_for_scope(conn, institution_id, identifier.agency_id, &identifier.resource)
                .await?;
        match recorded {
            None => {
                if add_identifier(
                    conn,
                    institution_id,
                    &identifier.identifier,
                    identifier.agency_id,
                    &identifier.resource,
                    note,
                )
                .await?
                {
                    messages.note(FlagTemplate::IdentifierAdded, &identifier.identifier);
                } else {
                    debug!(institution_id, identifier = %identifier.identifier, "Identifier added concurrently");
                }
            }
            Some(recorded) if recorded.identifier == identifier.identifier => {}
            Some(_) => {
                messages.note(FlagTemplate::IdentifierConflict, &identifier.identifier);
            }
        }
    }
    Ok(())
}

async fn populate_locations(
    conn: &mut SqliteConnection,
    institution_id: i64,
    institution: &PreparedInstitution,
    messages: &mut FlagMessages,
    note: &str,
) -> IngestResult<()> {
    for location in &institution.locations {
        let recorded = location_for_country(conn, institution_id, location.country.id).await?;
        match recorded {
            Some(recorded) => {
                let recorded_city = recorded
                    .city
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty());
                match (recorded_city, location.city.as_deref()) {
                    (Some(existing), Some(submitted)) if !existing.eq_ignore_ascii_case(submitted) => {
                        messages.note(FlagTemplate::CityConflict, submitted);
                    }
                    (existing, submitted) => {
                        let filled = fill_location(
                            conn,
                            recorded.id,
                            submitted,
                            location.latitude,
                            location.longitude,
                        )
                        .await?;
                        if let (true, None, Some(city)) = (filled, existing, submitted) {
                            messages.note(FlagTemplate::CityFilled, city);
                        }
                    }
                }
                // Stands until a reviewer verifies the country
                if !recorded.country_verified {
                    messages.note(FlagTemplate::CountryNotVerified, &location.country.name_english);
                }
            }
            None => {
                let added = add_location(
                    conn,
                    institution_id,
                    NewLocation {
                        country_id: location.country.id,
                        city: location.city.as_deref(),
                        lat: location.latitude,
                        long: location.longitude,
                        verified: false,
                    },
                    note,
                )
                .await?;
                if added {
                    messages.note(FlagTemplate::CountryAdded, &location.country.name_english);
                }
            }
        }
    }
    Ok(())
}

async fn populate_levels(
    conn: &mut SqliteConnection,
    institution_id: i64,
    institution: &PreparedInstitution,
    messages: &mut FlagMessages,
    note: &str,
) -> IngestResult<()> {
    if institution.qf_ehea_levels.is_empty() {
        return Ok(());
    }

    let recorded = institution_levels(conn, institution_id).await?;
    let had_levels = !recorded.is_empty();

    for level in &institution.qf_ehea_levels {
        if let Some(row) = recorded.iter().find(|l| l.qf_ehea_level_id == level.id) {
            if !row.qf_ehea_level_verified {
                messages.note(FlagTemplate::QfEheaLevelNotVerified, &level.level);
            }
            continue;
        }
        // Levels only start out verified when the institution had none at all
        let verified = !had_levels;
        if add_level(conn, institution_id, level.id, verified, note).await? {
            let template = if verified {
                FlagTemplate::QfEheaLevelAdded
            } else {
                FlagTemplate::QfEheaLevelUnverified
            };
            messages.note(template, &level.level);
        }
    }
    Ok(())
}

/// Create an institution from submitted data alone
///
/// Requires an official name and at least one location. Returns the new
/// institution id and canonical DEQAR id.
pub async fn create_institution(
    conn: &mut SqliteConnection,
    institution: &PreparedInstitution,
    messages: &mut FlagMessages,
) -> IngestResult<(i64, String)> {
    let label = institution.label();
    let Some(name_official) = institution.name_official.clone() else {
        return Err(IngestError::validation(format!(
            "{}: no matching institution, and name_official is required to create one",
            label
        )));
    };
    if institution.locations.is_empty() {
        return Err(IngestError::validation(format!(
            "{}: no matching institution, and at least one location is required to create one",
            label
        )));
    }

    let note = messages.source_note();
    let new = NewInstitution {
        eter_id: None,
        website_link: institution.website_link.clone(),
        name_official,
        name_official_transliterated: institution.name_official_transliterated.clone(),
        name_english: institution.name_english.clone(),
        acronym: institution.acronym.clone(),
        source_note: note.clone(),
    };

    let created = institutions::create_institution(conn, &new).await?.ok_or_else(|| {
        IngestError::Common(deqar_common::Error::Internal(format!(
            "{}: institution insert returned no row",
            label
        )))
    })?;
    let deqar_id = created
        .deqar_id
        .clone()
        .unwrap_or_else(|| institutions::deqar_id_for(created.id));

    if let Some(name) = current_name(conn, created.id).await? {
        for alternative in &institution.alternative_names {
            add_name_version(
                conn,
                name.id,
                &alternative.name,
                alternative.transliteration.as_deref(),
                &note,
            )
            .await?;
        }
    }

    for identifier in &institution.identifiers {
        add_identifier(
            conn,
            created.id,
            &identifier.identifier,
            identifier.agency_id,
            &identifier.resource,
            &note,
        )
        .await?;
    }

    for location in &institution.locations {
        add_location(
            conn,
            created.id,
            NewLocation {
                country_id: location.country.id,
                city: location.city.as_deref(),
                lat: location.latitude,
                long: location.longitude,
                verified: true,
            },
            &note,
        )
        .await?;
    }

    for level in &institution.qf_ehea_levels {
        add_level(conn, created.id, level.id, true, &note).await?;
    }

    messages.note(FlagTemplate::InstitutionCreated, &new.name_official);
    info!(institution_id = created.id, deqar_id = %deqar_id, "Created institution from submission");

    Ok((created.id, deqar_id))
}

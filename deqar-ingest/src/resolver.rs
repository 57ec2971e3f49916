//! Entity Resolver
//!
//! Maps a submitted institution to an existing registry record. Hard keys
//! (DEQAR id, ETER/OrgReg id, identifiers) are checked together and must
//! agree; soft keys (website, then official or English name) are only tried
//! when no hard key matched. As a last resort the same keys are matched
//! against ETER/OrgReg reference records not yet linked to an institution,
//! and a match creates the institution from the reference data.

use crate::db::institutions::{
    self, add_identifier, add_location, find_by_deqar_id, find_by_eter_id, find_by_identifier,
    find_by_name, find_by_website, NewInstitution, NewLocation,
};
use crate::error::{IngestError, IngestResult};
use crate::flag_messages::{FlagMessages, FlagTemplate};
use crate::validation::PreparedInstitution;
use deqar_common::db::reference::{find_reference_institution, reference_identifiers};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use tracing::debug;

/// Outcome of resolving one institution payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched an institution already in the registry
    Existing(i64),
    /// Created from an unlinked ETER/OrgReg reference record
    CreatedFromReference {
        institution_id: i64,
        deqar_id: String,
        eter_id: String,
    },
    /// Nothing matched; the population engine must create the institution
    NotFound,
}

impl Resolution {
    pub fn institution_id(&self) -> Option<i64> {
        match self {
            Resolution::Existing(id) => Some(*id),
            Resolution::CreatedFromReference { institution_id, .. } => Some(*institution_id),
            Resolution::NotFound => None,
        }
    }
}

/// The single record a key matched
///
/// `found` must be sorted; more than one distinct match is rejected.
fn single<T: PartialEq + std::fmt::Debug>(
    key: &str,
    label: &str,
    mut found: Vec<T>,
) -> IngestResult<Option<T>> {
    found.dedup();
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(IngestError::validation(format!(
            "{}: {} matches more than one record ({:?})",
            label, key, found
        ))),
    }
}

/// Resolve an institution payload
pub async fn resolve(
    conn: &mut SqliteConnection,
    institution: &PreparedInstitution,
    messages: &mut FlagMessages,
) -> IngestResult<Resolution> {
    let label = institution.label();

    // Hard keys: every one that resolves locally must name the same institution
    let mut hard: Vec<(String, i64)> = Vec::new();
    let mut reference_eter_id = None;

    if let Some(deqar_id) = &institution.deqar_id {
        match find_by_deqar_id(conn, deqar_id).await? {
            Some(found) => hard.push((format!("DEQAR id {}", deqar_id), found.id)),
            None => {
                return Err(IngestError::validation(format!(
                    "{}: unknown DEQAR id {}",
                    label, deqar_id
                )))
            }
        }
    }

    if let Some(eter_id) = &institution.eter_id {
        match find_by_eter_id(conn, eter_id).await? {
            Some(found) => hard.push((format!("ETER id {}", eter_id), found.id)),
            None => {
                if find_reference_institution(conn, eter_id).await?.is_none() {
                    return Err(IngestError::validation(format!(
                        "{}: unknown ETER id {}",
                        label, eter_id
                    )));
                }
                reference_eter_id = Some(eter_id.clone());
            }
        }
    }

    for identifier in &institution.identifiers {
        let key = format!("identifier {} ({})", identifier.identifier, identifier.resource);
        let found = find_by_identifier(
            conn,
            &identifier.identifier,
            &identifier.resource,
            identifier.agency_id,
        )
        .await?;
        if let Some(id) = single(&key, &label, found)? {
            hard.push((key, id));
        }
    }

    let distinct: BTreeSet<i64> = hard.iter().map(|(_, id)| *id).collect();
    if distinct.len() > 1 {
        let keys: Vec<String> = hard
            .iter()
            .map(|(key, id)| format!("{} -> institution {}", key, id))
            .collect();
        return Err(IngestError::validation(format!(
            "{}: submitted keys identify different institutions: {}",
            label,
            keys.join(", ")
        )));
    }
    if let Some((key, id)) = hard.first() {
        // An unlinked ETER id may only be attached to an institution without one
        if let Some(eter_id) = &reference_eter_id {
            let matched = institutions::get_institution(conn, *id).await?;
            if let Some(linked) = matched.eter_id.filter(|linked| !linked.eq_ignore_ascii_case(eter_id)) {
                return Err(IngestError::validation(format!(
                    "{}: submitted keys identify different institutions: {} -> institution {} (ETER id {}), ETER id {} -> unlinked reference record",
                    label, key, id, linked, eter_id
                )));
            }
        }
        debug!(institution = %label, key = %key, institution_id = id, "Resolved by hard key");
        return Ok(Resolution::Existing(*id));
    }

    if let Some(eter_id) = reference_eter_id {
        return create_from_reference(conn, &eter_id, messages).await;
    }

    // Soft keys against the registry
    if let Some(website) = &institution.website_link {
        let found = find_by_website(conn, website).await?;
        if let Some(id) = single(&format!("website {}", website), &label, found)? {
            debug!(institution = %label, institution_id = id, "Resolved by website");
            return Ok(Resolution::Existing(id));
        }
    }

    let mut by_name = Vec::new();
    for name in institution.names() {
        by_name.extend(find_by_name(conn, name).await?);
    }
    by_name.sort_unstable();
    if let Some(id) = single("name", &label, by_name)? {
        debug!(institution = %label, institution_id = id, "Resolved by name");
        return Ok(Resolution::Existing(id));
    }

    // Same keys against unlinked reference records
    let mut reference_ids = Vec::new();
    for identifier in institution.identifiers.iter().filter(|i| !i.is_local()) {
        reference_ids.extend(
            institutions::find_unlinked_reference_by_identifier(
                conn,
                &identifier.identifier,
                &identifier.resource,
            )
            .await?,
        );
    }
    if reference_ids.is_empty() {
        if let Some(website) = &institution.website_link {
            reference_ids = institutions::find_unlinked_reference_by_website(conn, website).await?;
        }
    }
    if reference_ids.is_empty() {
        for name in institution.names() {
            reference_ids.extend(institutions::find_unlinked_reference_by_name(conn, name).await?);
        }
    }
    reference_ids.sort();
    if let Some(eter_id) = single("reference record", &label, reference_ids)? {
        return create_from_reference(conn, &eter_id, messages).await;
    }

    debug!(institution = %label, "No matching institution");
    Ok(Resolution::NotFound)
}

/// Create an institution from an unlinked ETER/OrgReg record
///
/// If a concurrent submitter linked the record first, the winner is
/// returned as an existing institution.
pub async fn create_from_reference(
    conn: &mut SqliteConnection,
    eter_id: &str,
    messages: &mut FlagMessages,
) -> IngestResult<Resolution> {
    let record = find_reference_institution(conn, eter_id)
        .await?
        .ok_or_else(|| IngestError::validation(format!("unknown ETER id {}", eter_id)))?;
    let note = messages.source_note();

    let new = NewInstitution {
        eter_id: Some(record.eter_id.clone()),
        website_link: record.website_link.clone(),
        name_official: record.name_official.clone(),
        name_official_transliterated: None,
        name_english: record.name_english.clone(),
        acronym: record.acronym.clone(),
        source_note: note.clone(),
    };

    let Some(institution) = institutions::create_institution(conn, &new).await? else {
        let winner = find_by_eter_id(conn, eter_id).await?.ok_or_else(|| {
            IngestError::Common(deqar_common::Error::Internal(format!(
                "ETER id {} conflicted but is not linked",
                eter_id
            )))
        })?;
        debug!(eter_id, institution_id = winner.id, "Reference record linked concurrently");
        return Ok(Resolution::Existing(winner.id));
    };

    if let Some(country_id) = record.country_id {
        add_location(
            conn,
            institution.id,
            NewLocation {
                country_id,
                city: record.city.as_deref(),
                lat: record.lat,
                long: record.long,
                verified: true,
            },
            &note,
        )
        .await?;
    }

    for identifier in reference_identifiers(conn, eter_id).await? {
        add_identifier(
            conn,
            institution.id,
            &identifier.identifier,
            None,
            &identifier.resource,
            &note,
        )
        .await?;
    }

    messages.note(FlagTemplate::InstitutionCreatedFromReference, eter_id);

    let deqar_id = institution
        .deqar_id
        .clone()
        .unwrap_or_else(|| institutions::deqar_id_for(institution.id));
    tracing::info!(
        institution_id = institution.id,
        deqar_id = %deqar_id,
        eter_id,
        "Created institution from reference record"
    );

    Ok(Resolution::CreatedFromReference {
        institution_id: institution.id,
        deqar_id,
        eter_id: eter_id.to_string(),
    })
}

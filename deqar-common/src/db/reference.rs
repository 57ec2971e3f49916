//! Reference data: countries, QF-EHEA levels, identifier resources,
//! activities, agencies and their focus countries, ETER/OrgReg records
//!
//! Everything takes a `SqliteConnection` so lookups run inside a submission's
//! transaction and loaders inside the reference import's.

use crate::db::models::{
    Activity, Agency, AgencyFocusCountry, Country, QfEheaLevel, ReferenceInstitution,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Resource that scopes an identifier to the submitting agency
pub const LOCAL_IDENTIFIER_RESOURCE: &str = "local identifier";

/// Find an agency by numeric id or (case-insensitive) acronym
pub async fn find_agency(conn: &mut SqliteConnection, key: &str) -> Result<Option<Agency>> {
    let key = key.trim();
    let agency = match key.parse::<i64>() {
        Ok(id) => {
            sqlx::query_as::<_, Agency>(
                "SELECT id, acronym_primary, name_primary FROM agencies WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        }
        Err(_) => {
            sqlx::query_as::<_, Agency>(
                "SELECT id, acronym_primary, name_primary FROM agencies WHERE acronym_primary = ? COLLATE NOCASE",
            )
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(agency)
}

/// Find a country by ISO 3166 alpha-2 code or English name
pub async fn find_country(conn: &mut SqliteConnection, key: &str) -> Result<Option<Country>> {
    let country = sqlx::query_as::<_, Country>(
        r#"
        SELECT id, iso_3166_alpha2, name_english, ehea_is_member
        FROM countries
        WHERE iso_3166_alpha2 = ? COLLATE NOCASE OR name_english = ? COLLATE NOCASE
        ORDER BY iso_3166_alpha2 = ? COLLATE NOCASE DESC
        LIMIT 1
        "#,
    )
    .bind(key.trim())
    .bind(key.trim())
    .bind(key.trim())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(country)
}

/// Load a country by id
pub async fn get_country(conn: &mut SqliteConnection, id: i64) -> Result<Country> {
    let country = sqlx::query_as::<_, Country>(
        "SELECT id, iso_3166_alpha2, name_english, ehea_is_member FROM countries WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(country)
}

/// Find a QF-EHEA level by numeric code or level name ("first cycle")
pub async fn find_qf_ehea_level(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<QfEheaLevel>> {
    let key = key.trim();
    let level = match key.parse::<i64>() {
        Ok(code) => {
            sqlx::query_as::<_, QfEheaLevel>(
                "SELECT id, code, level FROM qf_ehea_levels WHERE code = ?",
            )
            .bind(code)
            .fetch_optional(&mut *conn)
            .await?
        }
        Err(_) => {
            sqlx::query_as::<_, QfEheaLevel>(
                "SELECT id, code, level FROM qf_ehea_levels WHERE level = ? COLLATE NOCASE",
            )
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(level)
}

/// Canonical spelling of a known identifier resource
pub async fn find_identifier_resource(
    conn: &mut SqliteConnection,
    resource: &str,
) -> Result<Option<String>> {
    let found: Option<String> = sqlx::query_scalar(
        "SELECT resource FROM identifier_resources WHERE resource = ? COLLATE NOCASE",
    )
    .bind(resource.trim())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found)
}

/// Find an activity by numeric id or name
pub async fn find_activity(conn: &mut SqliteConnection, key: &str) -> Result<Option<Activity>> {
    let key = key.trim();
    let activity = match key.parse::<i64>() {
        Ok(id) => {
            sqlx::query_as::<_, Activity>(
                "SELECT id, activity, activity_type FROM activities WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        }
        Err(_) => {
            sqlx::query_as::<_, Activity>(
                "SELECT id, activity, activity_type FROM activities WHERE activity = ? COLLATE NOCASE",
            )
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(activity)
}

/// Focus-country record of an agency for one country
pub async fn find_focus_country(
    conn: &mut SqliteConnection,
    agency_id: i64,
    country_id: i64,
) -> Result<Option<AgencyFocusCountry>> {
    let focus = sqlx::query_as::<_, AgencyFocusCountry>(
        r#"
        SELECT id, agency_id, country_id, country_is_official, country_is_crossborder
        FROM agency_focus_countries
        WHERE agency_id = ? AND country_id = ?
        "#,
    )
    .bind(agency_id)
    .bind(country_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(focus)
}

/// Add a cross-border, non-official focus country unless one already exists
///
/// Returns the record and whether this call created it.
pub async fn ensure_crossborder_focus_country(
    conn: &mut SqliteConnection,
    agency_id: i64,
    country_id: i64,
) -> Result<(AgencyFocusCountry, bool)> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO agency_focus_countries (agency_id, country_id, country_is_official, country_is_crossborder)
        VALUES (?, ?, 0, 1)
        ON CONFLICT (agency_id, country_id) DO NOTHING
        "#,
    )
    .bind(agency_id)
    .bind(country_id)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        == 1;

    let focus = find_focus_country(conn, agency_id, country_id)
        .await?
        .ok_or_else(|| {
            crate::Error::Internal(format!(
                "Focus country {} of agency {} vanished after upsert",
                country_id, agency_id
            ))
        })?;

    Ok((focus, inserted))
}

// ============================================================================
// Loaders
// ============================================================================

/// Insert or update a country; returns its id
pub async fn upsert_country(
    conn: &mut SqliteConnection,
    iso_3166_alpha2: &str,
    name_english: &str,
    ehea_is_member: bool,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO countries (iso_3166_alpha2, name_english, ehea_is_member)
        VALUES (?, ?, ?)
        ON CONFLICT (iso_3166_alpha2) DO UPDATE SET
            name_english = excluded.name_english,
            ehea_is_member = excluded.ehea_is_member
        RETURNING id
        "#,
    )
    .bind(iso_3166_alpha2.to_uppercase())
    .bind(name_english)
    .bind(ehea_is_member)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Insert or update an agency; returns its id
pub async fn upsert_agency(conn: &mut SqliteConnection, acronym: &str, name: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO agencies (acronym_primary, name_primary)
        VALUES (?, ?)
        ON CONFLICT (acronym_primary) DO UPDATE SET name_primary = excluded.name_primary
        RETURNING id
        "#,
    )
    .bind(acronym)
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Declare a focus country for an agency; returns the record id
pub async fn upsert_focus_country(
    conn: &mut SqliteConnection,
    agency_id: i64,
    country_id: i64,
    official: bool,
    crossborder: bool,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO agency_focus_countries (agency_id, country_id, country_is_official, country_is_crossborder)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (agency_id, country_id) DO UPDATE SET
            country_is_official = excluded.country_is_official,
            country_is_crossborder = excluded.country_is_crossborder
        RETURNING id
        "#,
    )
    .bind(agency_id)
    .bind(country_id)
    .bind(official)
    .bind(crossborder)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Insert or update an activity; returns its id
pub async fn upsert_activity(
    conn: &mut SqliteConnection,
    activity: &str,
    activity_type: &str,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO activities (activity, activity_type)
        VALUES (?, ?)
        ON CONFLICT (activity) DO UPDATE SET activity_type = excluded.activity_type
        RETURNING id
        "#,
    )
    .bind(activity)
    .bind(activity_type)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Identifier carried by a reference record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceIdentifier {
    pub identifier: String,
    pub resource: String,
}

/// Insert or replace an ETER/OrgReg reference record and its identifiers
///
/// Run it inside a transaction; the record and its identifiers are written
/// as separate statements.
pub async fn upsert_reference_institution(
    conn: &mut SqliteConnection,
    record: &ReferenceInstitution,
    identifiers: &[ReferenceIdentifier],
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reference_institutions (
            eter_id, name_official, name_english, acronym, website_link,
            country_id, city, lat, long
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (eter_id) DO UPDATE SET
            name_official = excluded.name_official,
            name_english = excluded.name_english,
            acronym = excluded.acronym,
            website_link = excluded.website_link,
            country_id = excluded.country_id,
            city = excluded.city,
            lat = excluded.lat,
            long = excluded.long
        "#,
    )
    .bind(&record.eter_id)
    .bind(&record.name_official)
    .bind(&record.name_english)
    .bind(&record.acronym)
    .bind(&record.website_link)
    .bind(record.country_id)
    .bind(&record.city)
    .bind(record.lat)
    .bind(record.long)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM reference_institution_identifiers WHERE eter_id = ?")
        .bind(&record.eter_id)
        .execute(&mut *conn)
        .await?;

    for identifier in identifiers {
        sqlx::query(
            r#"
            INSERT INTO reference_institution_identifiers (eter_id, identifier, resource)
            VALUES (?, ?, ?)
            ON CONFLICT (eter_id, resource) DO UPDATE SET identifier = excluded.identifier
            "#,
        )
        .bind(&record.eter_id)
        .bind(&identifier.identifier)
        .bind(&identifier.resource)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Load a reference record by ETER/OrgReg id
pub async fn find_reference_institution(
    conn: &mut SqliteConnection,
    eter_id: &str,
) -> Result<Option<ReferenceInstitution>> {
    let record = sqlx::query_as::<_, ReferenceInstitution>(
        r#"
        SELECT eter_id, name_official, name_english, acronym, website_link,
               country_id, city, lat, long
        FROM reference_institutions
        WHERE eter_id = ?
        "#,
    )
    .bind(eter_id.trim())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

/// Identifiers carried by a reference record
pub async fn reference_identifiers(
    conn: &mut SqliteConnection,
    eter_id: &str,
) -> Result<Vec<ReferenceIdentifier>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT identifier, resource FROM reference_institution_identifiers WHERE eter_id = ? ORDER BY resource",
    )
    .bind(eter_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(identifier, resource)| ReferenceIdentifier {
            identifier,
            resource,
        })
        .collect())
}

//! Institution persistence
//!
//! Finder queries used by the entity resolver and the compare-and-set
//! writes used by the population engine. Every additive write is a single
//! upsert statement, so a concurrent writer that got there first turns the
//! write into a no-op instead of an error.

use crate::error::IngestResult;
use deqar_common::db::models::{
    Institution, InstitutionCountry, InstitutionIdentifier, InstitutionName,
    InstitutionQfEheaLevel,
};
use sqlx::SqliteConnection;

const INSTITUTION_COLUMNS: &str = "id, deqar_id, eter_id, name_primary, name_sort, website_link";

/// Canonical id assigned to a new institution row
pub fn deqar_id_for(id: i64) -> String {
    format!("DEQARINST{:04}", id)
}

/// Primary display name and sort key derived from the current name record
pub fn display_names(name_official: &str, name_english: Option<&str>) -> (String, String) {
    let primary = name_english
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| name_official.trim())
        .to_string();
    let sort = primary
        .strip_prefix("The ")
        .unwrap_or(&primary)
        .to_string();
    (primary, sort)
}

// ============================================================================
// Finders
// ============================================================================

pub async fn get_institution(conn: &mut SqliteConnection, id: i64) -> IngestResult<Institution> {
    let institution = sqlx::query_as::<_, Institution>(&format!(
        "SELECT {} FROM institutions WHERE id = ?",
        INSTITUTION_COLUMNS
    ))
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(institution)
}

pub async fn find_by_deqar_id(
    conn: &mut SqliteConnection,
    deqar_id: &str,
) -> IngestResult<Option<Institution>> {
    let institution = sqlx::query_as::<_, Institution>(&format!(
        "SELECT {} FROM institutions WHERE deqar_id = ? COLLATE NOCASE",
        INSTITUTION_COLUMNS
    ))
    .bind(deqar_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(institution)
}

pub async fn find_by_eter_id(
    conn: &mut SqliteConnection,
    eter_id: &str,
) -> IngestResult<Option<Institution>> {
    let institution = sqlx::query_as::<_, Institution>(&format!(
        "SELECT {} FROM institutions WHERE eter_id = ?",
        INSTITUTION_COLUMNS
    ))
    .bind(eter_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(institution)
}

/// Institutions carrying an identifier in the given scope
///
/// `agency_id` is the owning agency for local identifiers and `None` for
/// global resources.
pub async fn find_by_identifier(
    conn: &mut SqliteConnection,
    identifier: &str,
    resource: &str,
    agency_id: Option<i64>,
) -> IngestResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT DISTINCT institution_id
        FROM institution_identifiers
        WHERE identifier = ? AND resource = ? AND COALESCE(agency_id, 0) = COALESCE(?, 0)
        ORDER BY institution_id
        "#,
    )
    .bind(identifier)
    .bind(resource)
    .bind(agency_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Institutions with the same website (case and trailing slash ignored)
pub async fn find_by_website(conn: &mut SqliteConnection, website: &str) -> IngestResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM institutions
        WHERE RTRIM(website_link, '/') = RTRIM(?, '/') COLLATE NOCASE
        ORDER BY id
        "#,
    )
    .bind(website.trim())
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Institutions whose current official or English name matches
pub async fn find_by_name(conn: &mut SqliteConnection, name: &str) -> IngestResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT DISTINCT institution_id FROM institution_names
        WHERE valid_to IS NULL
          AND (name_official = ? COLLATE NOCASE OR name_english = ? COLLATE NOCASE)
        ORDER BY institution_id
        "#,
    )
    .bind(name.trim())
    .bind(name.trim())
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Reference records not yet linked to any institution, matched by a global identifier
pub async fn find_unlinked_reference_by_identifier(
    conn: &mut SqliteConnection,
    identifier: &str,
    resource: &str,
) -> IngestResult<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.eter_id FROM reference_institution_identifiers r
        WHERE r.identifier = ? AND r.resource = ?
          AND NOT EXISTS (SELECT 1 FROM institutions i WHERE i.eter_id = r.eter_id)
        ORDER BY r.eter_id
        "#,
    )
    .bind(identifier)
    .bind(resource)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

pub async fn find_unlinked_reference_by_website(
    conn: &mut SqliteConnection,
    website: &str,
) -> IngestResult<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.eter_id FROM reference_institutions r
        WHERE RTRIM(r.website_link, '/') = RTRIM(?, '/') COLLATE NOCASE
          AND NOT EXISTS (SELECT 1 FROM institutions i WHERE i.eter_id = r.eter_id)
        ORDER BY r.eter_id
        "#,
    )
    .bind(website.trim())
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

pub async fn find_unlinked_reference_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> IngestResult<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.eter_id FROM reference_institutions r
        WHERE (r.name_official = ? COLLATE NOCASE OR r.name_english = ? COLLATE NOCASE)
          AND NOT EXISTS (SELECT 1 FROM institutions i WHERE i.eter_id = r.eter_id)
        ORDER BY r.eter_id
        "#,
    )
    .bind(name.trim())
    .bind(name.trim())
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

// ============================================================================
// Creation
// ============================================================================

/// Data needed to create an institution and its first name record
#[derive(Debug, Clone, Default)]
pub struct NewInstitution {
    pub eter_id: Option<String>,
    pub website_link: Option<String>,
    pub name_official: String,
    pub name_official_transliterated: Option<String>,
    pub name_english: Option<String>,
    pub acronym: Option<String>,
    pub source_note: String,
}

/// Create an institution with its current name record and canonical id
///
/// Returns `None` when `eter_id` is already linked to another institution,
/// i.e. a concurrent submitter created it first.
pub async fn create_institution(
    conn: &mut SqliteConnection,
    new: &NewInstitution,
) -> IngestResult<Option<Institution>> {
    let (name_primary, name_sort) = display_names(&new.name_official, new.name_english.as_deref());

    let id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO institutions (eter_id, website_link, name_primary, name_sort)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (eter_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&new.eter_id)
    .bind(&new.website_link)
    .bind(&name_primary)
    .bind(&name_sort)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(id) = id else {
        return Ok(None);
    };

    sqlx::query("UPDATE institutions SET deqar_id = ? WHERE id = ?")
        .bind(deqar_id_for(id))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO institution_names (
            institution_id, name_official, name_official_transliterated,
            name_english, acronym, name_source_note
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(&new.name_official)
    .bind(&new.name_official_transliterated)
    .bind(&new.name_english)
    .bind(&new.acronym)
    .bind(&new.source_note)
    .execute(&mut *conn)
    .await?;

    Ok(Some(get_institution(conn, id).await?))
}

// ============================================================================
// Names
// ============================================================================

/// Fillable column of the current name record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameField {
    Official,
    OfficialTransliterated,
    English,
    Acronym,
}

impl NameField {
    fn column(&self) -> &'static str {
        match self {
            NameField::Official => "name_official",
            NameField::OfficialTransliterated => "name_official_transliterated",
            NameField::English => "name_english",
            NameField::Acronym => "acronym",
        }
    }

    pub fn value<'a>(&self, name: &'a InstitutionName) -> Option<&'a str> {
        let value = match self {
            NameField::Official => name.name_official.as_deref(),
            NameField::OfficialTransliterated => name.name_official_transliterated.as_deref(),
            NameField::English => name.name_english.as_deref(),
            NameField::Acronym => name.acronym.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Current (valid_to IS NULL) name record
pub async fn current_name(
    conn: &mut SqliteConnection,
    institution_id: i64,
) -> IngestResult<Option<InstitutionName>> {
    let name = sqlx::query_as::<_, InstitutionName>(
        r#"
        SELECT id, institution_id, name_official, name_official_transliterated,
               name_english, acronym, name_source_note, valid_to
        FROM institution_names
        WHERE institution_id = ? AND valid_to IS NULL
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(institution_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(name)
}

/// Start a current name record for an institution that has none
pub async fn insert_empty_name(
    conn: &mut SqliteConnection,
    institution_id: i64,
    source_note: &str,
) -> IngestResult<InstitutionName> {
    let name = sqlx::query_as::<_, InstitutionName>(
        r#"
        INSERT INTO institution_names (institution_id, name_source_note)
        VALUES (?, ?)
        RETURNING id, institution_id, name_official, name_official_transliterated,
                  name_english, acronym, name_source_note, valid_to
        "#,
    )
    .bind(institution_id)
    .bind(source_note)
    .fetch_one(&mut *conn)
    .await?;
    Ok(name)
}

/// Set a name column only if it is still blank; returns whether it was written
pub async fn fill_name_field(
    conn: &mut SqliteConnection,
    name_id: i64,
    field: NameField,
    value: &str,
    source_note: &str,
) -> IngestResult<bool> {
    let column = field.column();
    let result = sqlx::query(&format!(
        "UPDATE institution_names SET {column} = ?, name_source_note = ? \
         WHERE id = ? AND ({column} IS NULL OR TRIM({column}) = '')",
        column = column
    ))
    .bind(value)
    .bind(source_note)
    .bind(name_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Add an alternate form of a name; returns false when it already exists
pub async fn add_name_version(
    conn: &mut SqliteConnection,
    name_id: i64,
    name: &str,
    transliteration: Option<&str>,
    source_note: &str,
) -> IngestResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO institution_name_versions (
            institution_name_id, name, transliteration, name_version_source_note
        ) VALUES (?, ?, ?, ?)
        ON CONFLICT (institution_name_id, name) DO NOTHING
        "#,
    )
    .bind(name_id)
    .bind(name)
    .bind(transliteration)
    .bind(source_note)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn name_versions(conn: &mut SqliteConnection, name_id: i64) -> IngestResult<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT name FROM institution_name_versions WHERE institution_name_id = ? ORDER BY id",
    )
    .bind(name_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(names)
}

/// Recompute `name_primary` and `name_sort` from the current name record
pub async fn refresh_primary_name(conn: &mut SqliteConnection, institution_id: i64) -> IngestResult<()> {
    let Some(name) = current_name(conn, institution_id).await? else {
        return Ok(());
    };
    let Some(official) = NameField::Official.value(&name) else {
        return Ok(());
    };
    let (primary, sort) = display_names(official, NameField::English.value(&name));

    sqlx::query(
        r#"
        UPDATE institutions
        SET name_primary = ?, name_sort = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(primary)
    .bind(sort)
    .bind(institution_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Set the website only if the institution has none
pub async fn fill_website(
    conn: &mut SqliteConnection,
    institution_id: i64,
    website: &str,
) -> IngestResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE institutions SET website_link = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ? AND (website_link IS NULL OR TRIM(website_link) = '')
        "#,
    )
    .bind(website)
    .bind(institution_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Link an ETER/OrgReg id to an institution that has none
pub async fn link_eter_id(
    conn: &mut SqliteConnection,
    institution_id: i64,
    eter_id: &str,
) -> IngestResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE institutions SET eter_id = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ? AND eter_id IS NULL
        "#,
    )
    .bind(eter_id)
    .bind(institution_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier an institution holds for one (agency, resource) scope
pub async fn identifier_for_scope(
    conn: &mut SqliteConnection,
    institution_id: i64,
    agency_id: Option<i64>,
    resource: &str,
) -> IngestResult<Option<InstitutionIdentifier>> {
    let identifier = sqlx::query_as::<_, InstitutionIdentifier>(
        r#"
        SELECT id, institution_id, identifier, agency_id, resource, identifier_source_note
        FROM institution_identifiers
        WHERE institution_id = ?
          AND COALESCE(agency_id, 0) = COALESCE(?, 0)
          AND COALESCE(resource, '') = ?
        "#,
    )
    .bind(institution_id)
    .bind(agency_id)
    .bind(resource)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(identifier)
}

pub async fn institution_identifiers(
    conn: &mut SqliteConnection,
    institution_id: i64,
) -> IngestResult<Vec<InstitutionIdentifier>> {
    let identifiers = sqlx::query_as::<_, InstitutionIdentifier>(
        r#"
        SELECT id, institution_id, identifier, agency_id, resource, identifier_source_note
        FROM institution_identifiers
        WHERE institution_id = ?
        ORDER BY id
        "#,
    )
    .bind(institution_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(identifiers)
}

/// Add an identifier unless the scope is already taken; returns whether it was inserted
pub async fn add_identifier(
    conn: &mut SqliteConnection,
    institution_id: i64,
    identifier: &str,
    agency_id: Option<i64>,
    resource: &str,
    source_note: &str,
) -> IngestResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO institution_identifiers (
            institution_id, identifier, agency_id, resource, identifier_source_note
        ) VALUES (?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(institution_id)
    .bind(identifier)
    .bind(agency_id)
    .bind(resource)
    .bind(source_note)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

// ============================================================================
// Locations
// ============================================================================

pub async fn institution_countries(
    conn: &mut SqliteConnection,
    institution_id: i64,
) -> IngestResult<Vec<InstitutionCountry>> {
    let rows = sqlx::query_as::<_, InstitutionCountry>(
        r#"
        SELECT id, institution_id, country_id, city, lat, long,
               country_source_note, country_verified
        FROM institution_countries
        WHERE institution_id = ?
        ORDER BY id
        "#,
    )
    .bind(institution_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn location_for_country(
    conn: &mut SqliteConnection,
    institution_id: i64,
    country_id: i64,
) -> IngestResult<Option<InstitutionCountry>> {
    let row = sqlx::query_as::<_, InstitutionCountry>(
        r#"
        SELECT id, institution_id, country_id, city, lat, long,
               country_source_note, country_verified
        FROM institution_countries
        WHERE institution_id = ? AND country_id = ?
        "#,
    )
    .bind(institution_id)
    .bind(country_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// New location of an institution
#[derive(Debug, Clone, Copy)]
pub struct NewLocation<'a> {
    pub country_id: i64,
    pub city: Option<&'a str>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub verified: bool,
}

/// Add a location unless the country is already recorded; returns whether it was inserted
pub async fn add_location(
    conn: &mut SqliteConnection,
    institution_id: i64,
    location: NewLocation<'_>,
    source_note: &str,
) -> IngestResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO institution_countries (
            institution_id, country_id, city, lat, long, country_source_note, country_verified
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (institution_id, country_id) DO NOTHING
        "#,
    )
    .bind(institution_id)
    .bind(location.country_id)
    .bind(location.city)
    .bind(location.lat)
    .bind(location.long)
    .bind(source_note)
    .bind(location.verified)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Fill blank city and coordinates of an existing location
///
/// Returns whether any column changed.
pub async fn fill_location(
    conn: &mut SqliteConnection,
    location_id: i64,
    city: Option<&str>,
    lat: Option<f64>,
    long: Option<f64>,
) -> IngestResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE institution_countries SET
            city = COALESCE(NULLIF(TRIM(city), ''), ?),
            lat = COALESCE(lat, ?),
            long = COALESCE(long, ?)
        WHERE id = ?
          AND (((city IS NULL OR TRIM(city) = '') AND ? IS NOT NULL)
               OR (lat IS NULL AND ? IS NOT NULL)
               OR (long IS NULL AND ? IS NOT NULL))
        "#,
    )
    .bind(city)
    .bind(lat)
    .bind(long)
    .bind(location_id)
    .bind(city)
    .bind(lat)
    .bind(long)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

// ============================================================================
// QF-EHEA levels
// ============================================================================

pub async fn institution_levels(
    conn: &mut SqliteConnection,
    institution_id: i64,
) -> IngestResult<Vec<InstitutionQfEheaLevel>> {
    let rows = sqlx::query_as::<_, InstitutionQfEheaLevel>(
        r#"
        SELECT id, institution_id, qf_ehea_level_id, qf_ehea_level_source_note, qf_ehea_level_verified
        FROM institution_qf_ehea_levels
        WHERE institution_id = ?
        ORDER BY id
        "#,
    )
    .bind(institution_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Add a QF-EHEA level unless already recorded; returns whether it was inserted
pub async fn add_level(
    conn: &mut SqliteConnection,
    institution_id: i64,
    qf_ehea_level_id: i64,
    verified: bool,
    source_note: &str,
) -> IngestResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO institution_qf_ehea_levels (
            institution_id, qf_ehea_level_id, qf_ehea_level_source_note, qf_ehea_level_verified
        ) VALUES (?, ?, ?, ?)
        ON CONFLICT (institution_id, qf_ehea_level_id) DO NOTHING
        "#,
    )
    .bind(institution_id)
    .bind(qf_ehea_level_id)
    .bind(source_note)
    .bind(verified)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deqar_id_is_zero_padded() {
        assert_eq!(deqar_id_for(3), "DEQARINST0003");
        assert_eq!(deqar_id_for(12345), "DEQARINST12345");
    }

    #[test]
    fn test_display_names_prefer_english() {
        assert_eq!(
            display_names("Universität Wien", Some("University of Vienna")),
            ("University of Vienna".to_string(), "University of Vienna".to_string())
        );
        assert_eq!(
            display_names("The Open University", None),
            ("The Open University".to_string(), "Open University".to_string())
        );
        assert_eq!(
            display_names("Corvinus Egyetem", Some("  ")),
            ("Corvinus Egyetem".to_string(), "Corvinus Egyetem".to_string())
        );
    }
}

//! Report persistence
//!
//! Report rows and their wholesale-replaced collections (activities,
//! institution links, report links, files), report flags, and the fact
//! queries the flag engine evaluates its rules on.

use crate::error::{IngestError, IngestResult};
use crate::types::{ReportFilePayload, ReportLinkPayload};
use chrono::NaiveDate;
use deqar_common::db::models::{
    FlagLevel, Report, ReportDecision, ReportFile, ReportFlag, ReportStatus,
};
use deqar_common::error::is_unique_violation;
use sqlx::SqliteConnection;
use std::collections::HashMap;

const REPORT_COLUMNS: &str =
    "id, agency_id, local_identifier, status, decision, valid_from, valid_to, flag_level, other_comment";

/// Columns written from a submission
#[derive(Debug, Clone)]
pub struct ReportFields<'a> {
    pub agency_id: i64,
    pub local_identifier: Option<&'a str>,
    pub status: ReportStatus,
    pub decision: ReportDecision,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub other_comment: Option<&'a str>,
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub async fn get_report(conn: &mut SqliteConnection, id: i64) -> IngestResult<Option<Report>> {
    let report = sqlx::query_as::<_, Report>(&format!(
        "SELECT {} FROM reports WHERE id = ?",
        REPORT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(report)
}

pub async fn find_report_by_local_id(
    conn: &mut SqliteConnection,
    agency_id: i64,
    local_identifier: &str,
) -> IngestResult<Option<Report>> {
    let report = sqlx::query_as::<_, Report>(&format!(
        "SELECT {} FROM reports WHERE agency_id = ? AND local_identifier = ?",
        REPORT_COLUMNS
    ))
    .bind(agency_id)
    .bind(local_identifier)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(report)
}

/// Insert a report; fails with a unique violation when the local identifier is taken
pub async fn insert_report(conn: &mut SqliteConnection, fields: &ReportFields<'_>) -> IngestResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO reports (
            agency_id, local_identifier, status, decision, valid_from, valid_to, other_comment
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(fields.agency_id)
    .bind(fields.local_identifier)
    .bind(fields.status.as_str())
    .bind(fields.decision.as_str())
    .bind(format_date(fields.valid_from))
    .bind(fields.valid_to.map(format_date))
    .bind(fields.other_comment)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Insert a report, or take over the row another unit inserted first
///
/// A unique violation on (agency, local identifier) updates that report
/// when `adopt_existing` is set and is a validation error otherwise.
pub async fn insert_or_adopt_report(
    conn: &mut SqliteConnection,
    fields: &ReportFields<'_>,
    adopt_existing: bool,
) -> IngestResult<i64> {
    match insert_report(conn, fields).await {
        Ok(id) => Ok(id),
        Err(IngestError::Database(e)) if is_unique_violation(&e) => {
            let winner = match (fields.local_identifier, adopt_existing) {
                (Some(local_id), true) => find_report_by_local_id(conn, fields.agency_id, local_id).await?,
                _ => None,
            };
            let Some(winner) = winner else {
                return Err(IngestError::validation(format!(
                    "report with local identifier {} already exists",
                    fields.local_identifier.unwrap_or_default()
                )));
            };
            update_report(conn, winner.id, fields).await?;
            Ok(winner.id)
        }
        Err(e) => Err(e),
    }
}

pub async fn update_report(
    conn: &mut SqliteConnection,
    id: i64,
    fields: &ReportFields<'_>,
) -> IngestResult<()> {
    sqlx::query(
        r#"
        UPDATE reports SET
            local_identifier = COALESCE(?, local_identifier),
            status = ?,
            decision = ?,
            valid_from = ?,
            valid_to = ?,
            other_comment = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(fields.local_identifier)
    .bind(fields.status.as_str())
    .bind(fields.decision.as_str())
    .bind(format_date(fields.valid_from))
    .bind(fields.valid_to.map(format_date))
    .bind(fields.other_comment)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn replace_activities(
    conn: &mut SqliteConnection,
    report_id: i64,
    activity_ids: &[i64],
) -> IngestResult<()> {
    sqlx::query("DELETE FROM report_activities WHERE report_id = ?")
        .bind(report_id)
        .execute(&mut *conn)
        .await?;

    for activity_id in activity_ids {
        sqlx::query("INSERT OR IGNORE INTO report_activities (report_id, activity_id) VALUES (?, ?)")
            .bind(report_id)
            .bind(activity_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Replace the institutions covered by a report
pub async fn replace_institutions(
    conn: &mut SqliteConnection,
    report_id: i64,
    institution_ids: &[i64],
) -> IngestResult<()> {
    sqlx::query("DELETE FROM report_institutions WHERE report_id = ?")
        .bind(report_id)
        .execute(&mut *conn)
        .await?;

    for institution_id in institution_ids {
        sqlx::query("INSERT OR IGNORE INTO report_institutions (report_id, institution_id) VALUES (?, ?)")
            .bind(report_id)
            .bind(institution_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Replace the platforms a report was delivered through
pub async fn replace_platforms(
    conn: &mut SqliteConnection,
    report_id: i64,
    institution_ids: &[i64],
) -> IngestResult<()> {
    sqlx::query("DELETE FROM report_platforms WHERE report_id = ?")
        .bind(report_id)
        .execute(&mut *conn)
        .await?;

    for institution_id in institution_ids {
        sqlx::query("INSERT OR IGNORE INTO report_platforms (report_id, institution_id) VALUES (?, ?)")
            .bind(report_id)
            .bind(institution_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn replace_links(
    conn: &mut SqliteConnection,
    report_id: i64,
    links: &[ReportLinkPayload],
) -> IngestResult<()> {
    sqlx::query("DELETE FROM report_links WHERE report_id = ?")
        .bind(report_id)
        .execute(&mut *conn)
        .await?;

    for link in links {
        sqlx::query("INSERT INTO report_links (report_id, link, link_display_name) VALUES (?, ?, ?)")
            .bind(report_id)
            .bind(&link.link)
            .bind(&link.link_display_name)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn report_files(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<Vec<ReportFile>> {
    let files = sqlx::query_as::<_, ReportFile>(
        r#"
        SELECT id, report_id, file_display_name, file_original_location, file_path, languages
        FROM report_files
        WHERE report_id = ?
        ORDER BY id
        "#,
    )
    .bind(report_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(files)
}

/// Replace a report's files
///
/// A file whose original location is unchanged keeps the stored copy of
/// its previous row. Returns the new rows.
pub async fn replace_files(
    conn: &mut SqliteConnection,
    report_id: i64,
    files: &[ReportFilePayload],
) -> IngestResult<Vec<ReportFile>> {
    let stored: HashMap<String, String> = report_files(conn, report_id)
        .await?
        .into_iter()
        .filter_map(|f| Some((f.file_original_location?, f.file_path?)))
        .collect();

    sqlx::query("DELETE FROM report_files WHERE report_id = ?")
        .bind(report_id)
        .execute(&mut *conn)
        .await?;

    let mut rows = Vec::with_capacity(files.len());
    for file in files {
        let file_path = file
            .original_location
            .as_ref()
            .and_then(|location| stored.get(location))
            .cloned();
        let languages = serde_json::to_string(&file.report_language)?;

        let row = sqlx::query_as::<_, ReportFile>(
            r#"
            INSERT INTO report_files (
                report_id, file_display_name, file_original_location, file_path, languages
            ) VALUES (?, ?, ?, ?, ?)
            RETURNING id, report_id, file_display_name, file_original_location, file_path, languages
            "#,
        )
        .bind(report_id)
        .bind(&file.display_name)
        .bind(&file.original_location)
        .bind(file_path)
        .bind(languages)
        .fetch_one(&mut *conn)
        .await?;
        rows.push(row);
    }
    Ok(rows)
}

/// Record the local copy of a downloaded report file
pub async fn set_file_path(conn: &mut SqliteConnection, file_id: i64, file_path: &str) -> IngestResult<()> {
    sqlx::query("UPDATE report_files SET file_path = ? WHERE id = ?")
        .bind(file_path)
        .bind(file_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ============================================================================
// Flags
// ============================================================================

const FLAG_COLUMNS: &str = "id, report_id, flag, flag_message, active, removed_by_eqar";

/// Mark every flag of a report inactive and reset its level
///
/// Rows are kept so that reviewed flags and their override survive.
pub async fn reset_flags(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<()> {
    sqlx::query(
        "UPDATE report_flags SET active = 0, updated_at = CURRENT_TIMESTAMP WHERE report_id = ? AND active = 1",
    )
    .bind(report_id)
    .execute(&mut *conn)
    .await?;
    set_flag_level(conn, report_id, FlagLevel::None).await
}

/// Raise a flag: create it, or reactivate it unless it was removed by EQAR
///
/// Returns whether the flag is active afterwards.
pub async fn upsert_flag(
    conn: &mut SqliteConnection,
    report_id: i64,
    level: FlagLevel,
    message: &str,
) -> IngestResult<bool> {
    let active: bool = sqlx::query_scalar(
        r#"
        INSERT INTO report_flags (report_id, flag, flag_message, active, removed_by_eqar)
        VALUES (?, ?, ?, 1, 0)
        ON CONFLICT (report_id, flag, flag_message) DO UPDATE SET
            active = CASE WHEN report_flags.removed_by_eqar THEN 0 ELSE 1 END,
            updated_at = CURRENT_TIMESTAMP
        RETURNING active
        "#,
    )
    .bind(report_id)
    .bind(level.as_str())
    .bind(message)
    .fetch_one(&mut *conn)
    .await?;
    Ok(active)
}

pub async fn set_flag_level(conn: &mut SqliteConnection, report_id: i64, level: FlagLevel) -> IngestResult<()> {
    sqlx::query("UPDATE reports SET flag_level = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(level.as_str())
        .bind(report_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn report_flags(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<Vec<ReportFlag>> {
    let flags = sqlx::query_as::<_, ReportFlag>(&format!(
        "SELECT {} FROM report_flags WHERE report_id = ? ORDER BY id",
        FLAG_COLUMNS
    ))
    .bind(report_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(flags)
}

pub async fn active_flags(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<Vec<ReportFlag>> {
    let flags = sqlx::query_as::<_, ReportFlag>(&format!(
        "SELECT {} FROM report_flags WHERE report_id = ? AND active = 1 ORDER BY id",
        FLAG_COLUMNS
    ))
    .bind(report_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(flags)
}

/// Record a reviewer's decision on a flag
///
/// Removing deactivates the flag and keeps later passes from reactivating it.
/// Restoring only lifts the override; the next pass decides whether it is active.
pub async fn set_flag_removed_by_eqar(
    conn: &mut SqliteConnection,
    flag_id: i64,
    removed: bool,
) -> IngestResult<()> {
    sqlx::query(
        r#"
        UPDATE report_flags SET
            removed_by_eqar = ?,
            active = CASE WHEN ? THEN 0 ELSE active END,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(removed)
    .bind(removed)
    .bind(flag_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ============================================================================
// Flag rule facts
// ============================================================================

/// Institutions (not platforms) covered by a report
pub async fn report_institution_ids(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT institution_id FROM report_institutions WHERE report_id = ? ORDER BY institution_id",
    )
    .bind(report_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Institutions and platforms linked to a report
pub async fn linked_institution_ids(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT institution_id FROM report_institutions WHERE report_id = ?
        UNION
        SELECT institution_id FROM report_platforms WHERE report_id = ?
        ORDER BY 1
        "#,
    )
    .bind(report_id)
    .bind(report_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Countries of all institutions and platforms linked to a report
pub async fn linked_country_ids(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT DISTINCT ic.country_id
        FROM institution_countries ic
        WHERE ic.institution_id IN (
            SELECT institution_id FROM report_institutions WHERE report_id = ?
            UNION
            SELECT institution_id FROM report_platforms WHERE report_id = ?
        )
        ORDER BY ic.country_id
        "#,
    )
    .bind(report_id)
    .bind(report_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

pub async fn programme_country_ids(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT DISTINCT pc.country_id
        FROM programme_countries pc
        JOIN programmes p ON p.id = pc.programme_id
        WHERE p.report_id = ?
        ORDER BY pc.country_id
        "#,
    )
    .bind(report_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Distinct QF-EHEA levels declared by the report's programmes, as (id, level name)
pub async fn programme_levels(
    conn: &mut SqliteConnection,
    report_id: i64,
) -> IngestResult<Vec<(i64, String)>> {
    let levels = sqlx::query_as::<_, (i64, String)>(
        r#"
        SELECT DISTINCT l.id, l.level
        FROM programmes p
        JOIN qf_ehea_levels l ON l.id = p.qf_ehea_level_id
        WHERE p.report_id = ?
        ORDER BY l.code
        "#,
    )
    .bind(report_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(levels)
}

/// Verified QF-EHEA levels of one institution
pub async fn verified_level_ids(conn: &mut SqliteConnection, institution_id: i64) -> IngestResult<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT qf_ehea_level_id FROM institution_qf_ehea_levels
        WHERE institution_id = ? AND qf_ehea_level_verified = 1
        ORDER BY qf_ehea_level_id
        "#,
    )
    .bind(institution_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Count of QF-EHEA levels (verified or not) of one institution
pub async fn level_count(conn: &mut SqliteConnection, institution_id: i64) -> IngestResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM institution_qf_ehea_levels WHERE institution_id = ?",
    )
    .bind(institution_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Whether an institution has a location in an EHEA member country
pub async fn in_ehea_country(conn: &mut SqliteConnection, institution_id: i64) -> IngestResult<bool> {
    let found: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM institution_countries ic
        JOIN countries c ON c.id = ic.country_id
        WHERE ic.institution_id = ? AND c.ehea_is_member = 1
        "#,
    )
    .bind(institution_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(found > 0)
}

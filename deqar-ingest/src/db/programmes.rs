//! Programme persistence

use crate::error::IngestResult;
use sqlx::SqliteConnection;

/// Delete every programme of a report (names and countries cascade)
pub async fn delete_programmes(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<u64> {
    let result = sqlx::query("DELETE FROM programmes WHERE report_id = ?")
        .bind(report_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_programme(
    conn: &mut SqliteConnection,
    report_id: i64,
    name_primary: &str,
    qf_ehea_level_id: Option<i64>,
    nqf_level: Option<&str>,
    degree_outcome: Option<&str>,
) -> IngestResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO programmes (report_id, name_primary, qf_ehea_level_id, nqf_level, degree_outcome)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(report_id)
    .bind(name_primary)
    .bind(qf_ehea_level_id)
    .bind(nqf_level)
    .bind(degree_outcome)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn insert_programme_name(
    conn: &mut SqliteConnection,
    programme_id: i64,
    name: &str,
    qualification: Option<&str>,
    name_is_primary: bool,
) -> IngestResult<()> {
    sqlx::query(
        r#"
        INSERT INTO programme_names (programme_id, name, qualification, name_is_primary)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(programme_id)
    .bind(name)
    .bind(qualification)
    .bind(name_is_primary)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn add_programme_country(
    conn: &mut SqliteConnection,
    programme_id: i64,
    country_id: i64,
) -> IngestResult<()> {
    sqlx::query("INSERT OR IGNORE INTO programme_countries (programme_id, country_id) VALUES (?, ?)")
        .bind(programme_id)
        .bind(country_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn programme_count(conn: &mut SqliteConnection, report_id: i64) -> IngestResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM programmes WHERE report_id = ?")
        .bind(report_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

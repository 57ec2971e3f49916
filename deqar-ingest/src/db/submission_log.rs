//! Submission audit log
//!
//! One row per submission unit, written inside the unit's transaction on
//! success and through the pool after rollback on failure.

use crate::error::IngestResult;
use crate::flag_messages::LogEntry;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;

/// Audit record for one submission unit
#[derive(Debug, Clone)]
pub struct NewSubmissionLog<'a> {
    pub submission_id: Uuid,
    pub agency_id: Option<i64>,
    pub report_id: Option<i64>,
    pub submitted_data: &'a serde_json::Value,
    pub report_status: &'a str,
    pub flag_level: Option<&'a str>,
    pub report_warnings: &'a [String],
    pub institution_warnings: &'a [LogEntry],
    pub errors: &'a [String],
}

/// Stored audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubmissionLog {
    pub id: i64,
    pub submission_id: String,
    pub agency_id: Option<i64>,
    pub report_id: Option<i64>,
    pub submitted_data: String,
    pub report_status: String,
    pub flag_level: Option<String>,
    pub report_warnings: String,
    pub institution_warnings: String,
    pub errors: String,
}

impl SubmissionLog {
    pub fn report_warnings(&self) -> Vec<String> {
        serde_json::from_str(&self.report_warnings).unwrap_or_default()
    }

    pub fn institution_warnings(&self) -> Vec<LogEntry> {
        serde_json::from_str(&self.institution_warnings).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<String> {
        serde_json::from_str(&self.errors).unwrap_or_default()
    }
}

pub async fn insert_submission_log(
    conn: &mut SqliteConnection,
    log: &NewSubmissionLog<'_>,
) -> IngestResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO submission_logs (
            submission_id, agency_id, report_id, submitted_data, report_status,
            flag_level, report_warnings, institution_warnings, errors
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(log.submission_id.to_string())
    .bind(log.agency_id)
    .bind(log.report_id)
    .bind(serde_json::to_string(log.submitted_data)?)
    .bind(log.report_status)
    .bind(log.flag_level)
    .bind(serde_json::to_string(log.report_warnings)?)
    .bind(serde_json::to_string(log.institution_warnings)?)
    .bind(serde_json::to_string(log.errors)?)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn find_submission_log(
    conn: &mut SqliteConnection,
    submission_id: Uuid,
) -> IngestResult<Option<SubmissionLog>> {
    let log = sqlx::query_as::<_, SubmissionLog>(
        r#"
        SELECT id, submission_id, agency_id, report_id, submitted_data, report_status,
               flag_level, report_warnings, institution_warnings, errors
        FROM submission_logs
        WHERE submission_id = ?
        "#,
    )
    .bind(submission_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(log)
}

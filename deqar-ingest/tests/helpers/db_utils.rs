//! Database Test Utilities
//!
//! Temporary registry databases seeded with a small reference vocabulary

use anyhow::Result;
use chrono::NaiveDate;
use deqar_common::config::IngestConfig;
use deqar_common::db::init_database;
use deqar_common::db::models::Institution;
use deqar_common::db::reference::{
    upsert_activity, upsert_agency, upsert_country, upsert_focus_country,
};
use deqar_common::EventBus;
use deqar_ingest::db::institutions::{add_location, create_institution, NewInstitution, NewLocation};
use deqar_ingest::SubmissionOrchestrator;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Fixed day for provenance notes and date rules
pub const TODAY: (i32, u32, u32) = (2024, 6, 1);

/// Ids of the seeded reference rows
#[derive(Debug, Clone, Copy)]
pub struct Registry {
    /// ACQUIN: official in Germany, non-official in Austria
    pub acquin: i64,
    /// AQ Austria: official in Austria
    pub aq: i64,
    pub austria: i64,
    pub germany: i64,
    pub hungary: i64,
    pub united_states: i64,
}

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_deqar.db");
    let pool = init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Seed countries, agencies with their focus countries and activities
pub async fn seed_registry(pool: &SqlitePool) -> Result<Registry> {
    let mut conn = pool.acquire().await?;
    let austria = upsert_country(&mut conn, "AT", "Austria", true).await?;
    let germany = upsert_country(&mut conn, "DE", "Germany", true).await?;
    let hungary = upsert_country(&mut conn, "HU", "Hungary", true).await?;
    let united_states = upsert_country(&mut conn, "US", "United States", false).await?;

    let acquin = upsert_agency(
        &mut conn,
        "ACQUIN",
        "Accreditation, Certification and Quality Assurance Institute",
    )
    .await?;
    upsert_focus_country(&mut conn, acquin, germany, true, false).await?;
    upsert_focus_country(&mut conn, acquin, austria, false, true).await?;

    let aq = upsert_agency(&mut conn, "AQ Austria", "Agency for Quality Assurance and Accreditation Austria").await?;
    upsert_focus_country(&mut conn, aq, austria, true, false).await?;

    upsert_activity(&mut conn, "programme accreditation", "programme").await?;
    upsert_activity(&mut conn, "institutional audit", "institutional").await?;

    Ok(Registry {
        acquin,
        aq,
        austria,
        germany,
        hungary,
        united_states,
    })
}

/// Orchestrator over the pool with default config and a fixed day
pub fn test_orchestrator(pool: &SqlitePool, events: EventBus) -> SubmissionOrchestrator {
    test_orchestrator_with(pool, events, &IngestConfig::default())
}

pub fn test_orchestrator_with(
    pool: &SqlitePool,
    events: EventBus,
    config: &IngestConfig,
) -> SubmissionOrchestrator {
    let (y, m, d) = TODAY;
    let today = NaiveDate::from_ymd_opt(y, m, d).unwrap();
    SubmissionOrchestrator::new(pool.clone(), events, config).with_today(today)
}

/// Insert an institution with a verified location directly
pub async fn add_institution(
    pool: &SqlitePool,
    name_official: &str,
    country_id: i64,
    city: Option<&str>,
) -> Institution {
    let mut conn = pool.acquire().await.unwrap();
    let new = NewInstitution {
        name_official: name_official.to_string(),
        source_note: "test fixture".to_string(),
        ..Default::default()
    };
    let institution = create_institution(&mut conn, &new).await.unwrap().unwrap();
    add_location(
        &mut conn,
        institution.id,
        NewLocation {
            country_id,
            city,
            lat: None,
            long: None,
            verified: true,
        },
        "test fixture",
    )
    .await
    .unwrap();
    institution
}

/// Row count of a table
pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

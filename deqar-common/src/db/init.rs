//! Database initialization
//!
//! Opens (or creates) the registry database and brings the schema up to
//! date. Every statement is idempotent, so this runs on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 250;

/// Identifier resources known to the registry
///
/// `local identifier` is agency-scoped; all others are global.
pub const IDENTIFIER_RESOURCES: &[&str] = &["local identifier", "Erasmus", "SCHAC", "ETER", "WHED"];

/// QF-EHEA levels as (code, level)
pub const QF_EHEA_LEVELS: &[(i64, &str)] = &[
    (0, "short cycle"),
    (1, "first cycle"),
    (2, "second cycle"),
    (3, "third cycle"),
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
}

/// Initialize database with an explicit busy timeout
pub async fn init_database_with_timeout(db_path: &Path, busy_timeout_ms: u64) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Foreign keys and busy timeout are per-connection settings, so they go
    // on the connect options rather than a one-off PRAGMA.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    seed_vocabulary(&pool).await?;

    info!("Database busy timeout set to {} ms", busy_timeout_ms);

    Ok(pool)
}

/// Create all registry tables
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_reference_tables(pool).await?;
    create_agency_tables(pool).await?;
    create_institution_tables(pool).await?;
    create_reference_institution_tables(pool).await?;
    create_report_tables(pool).await?;
    create_programme_tables(pool).await?;
    create_submission_log_table(pool).await?;
    Ok(())
}

async fn execute_all(pool: &SqlitePool, statements: &[&str]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

async fn create_reference_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS countries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                iso_3166_alpha2 TEXT NOT NULL UNIQUE,
                name_english TEXT NOT NULL,
                ehea_is_member INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS qf_ehea_levels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code INTEGER NOT NULL UNIQUE,
                level TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS identifier_resources (
                resource TEXT PRIMARY KEY
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                activity TEXT NOT NULL UNIQUE,
                activity_type TEXT NOT NULL
            )
            "#,
        ],
    )
    .await
}

async fn create_agency_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS agencies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                acronym_primary TEXT NOT NULL UNIQUE,
                name_primary TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS agency_focus_countries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agency_id INTEGER NOT NULL REFERENCES agencies(id) ON DELETE CASCADE,
                country_id INTEGER NOT NULL REFERENCES countries(id),
                country_is_official INTEGER NOT NULL DEFAULT 0,
                country_is_crossborder INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (agency_id, country_id)
            )
            "#,
        ],
    )
    .await
}

async fn create_institution_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS institutions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deqar_id TEXT UNIQUE,
                eter_id TEXT UNIQUE,
                name_primary TEXT NOT NULL DEFAULT '',
                name_sort TEXT NOT NULL DEFAULT '',
                website_link TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS institution_names (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                institution_id INTEGER NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
                name_official TEXT,
                name_official_transliterated TEXT,
                name_english TEXT,
                acronym TEXT,
                name_source_note TEXT,
                valid_to TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS institution_name_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                institution_name_id INTEGER NOT NULL REFERENCES institution_names(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                transliteration TEXT,
                name_version_source_note TEXT,
                UNIQUE (institution_name_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS institution_identifiers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                institution_id INTEGER NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
                identifier TEXT NOT NULL,
                agency_id INTEGER REFERENCES agencies(id),
                resource TEXT,
                identifier_source_note TEXT
            )
            "#,
            // NULL agency/resource must still collide, so fold them in an expression index
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS institution_identifiers_scope
            ON institution_identifiers (institution_id, COALESCE(agency_id, 0), COALESCE(resource, ''))
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS institution_identifiers_lookup
            ON institution_identifiers (identifier, resource)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS institution_countries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                institution_id INTEGER NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
                country_id INTEGER NOT NULL REFERENCES countries(id),
                city TEXT,
                lat REAL,
                long REAL,
                country_source_note TEXT,
                country_verified INTEGER NOT NULL DEFAULT 1,
                UNIQUE (institution_id, country_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS institution_qf_ehea_levels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                institution_id INTEGER NOT NULL REFERENCES institutions(id) ON DELETE CASCADE,
                qf_ehea_level_id INTEGER NOT NULL REFERENCES qf_ehea_levels(id),
                qf_ehea_level_source_note TEXT,
                qf_ehea_level_verified INTEGER NOT NULL DEFAULT 1,
                UNIQUE (institution_id, qf_ehea_level_id)
            )
            "#,
        ],
    )
    .await
}

async fn create_reference_institution_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS reference_institutions (
                eter_id TEXT PRIMARY KEY,
                name_official TEXT NOT NULL,
                name_english TEXT,
                acronym TEXT,
                website_link TEXT,
                country_id INTEGER REFERENCES countries(id),
                city TEXT,
                lat REAL,
                long REAL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reference_institution_identifiers (
                eter_id TEXT NOT NULL REFERENCES reference_institutions(eter_id) ON DELETE CASCADE,
                identifier TEXT NOT NULL,
                resource TEXT NOT NULL,
                PRIMARY KEY (eter_id, resource)
            )
            "#,
        ],
    )
    .await
}

async fn create_report_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agency_id INTEGER NOT NULL REFERENCES agencies(id),
                local_identifier TEXT,
                status TEXT NOT NULL,
                decision TEXT NOT NULL,
                valid_from TEXT NOT NULL,
                valid_to TEXT,
                flag_level TEXT NOT NULL DEFAULT 'none',
                other_comment TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (agency_id, local_identifier)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS report_activities (
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                activity_id INTEGER NOT NULL REFERENCES activities(id),
                PRIMARY KEY (report_id, activity_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS report_institutions (
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                institution_id INTEGER NOT NULL REFERENCES institutions(id),
                PRIMARY KEY (report_id, institution_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS report_platforms (
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                institution_id INTEGER NOT NULL REFERENCES institutions(id),
                PRIMARY KEY (report_id, institution_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS report_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                link TEXT NOT NULL,
                link_display_name TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS report_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                file_display_name TEXT,
                file_original_location TEXT,
                file_path TEXT,
                languages TEXT NOT NULL DEFAULT '[]'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS report_flags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                flag TEXT NOT NULL,
                flag_message TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                removed_by_eqar INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (report_id, flag, flag_message)
            )
            "#,
        ],
    )
    .await
}

async fn create_programme_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS programmes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                name_primary TEXT NOT NULL,
                qf_ehea_level_id INTEGER REFERENCES qf_ehea_levels(id),
                nqf_level TEXT,
                degree_outcome TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS programme_names (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                programme_id INTEGER NOT NULL REFERENCES programmes(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                qualification TEXT,
                name_is_primary INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS programme_countries (
                programme_id INTEGER NOT NULL REFERENCES programmes(id) ON DELETE CASCADE,
                country_id INTEGER NOT NULL REFERENCES countries(id),
                PRIMARY KEY (programme_id, country_id)
            )
            "#,
        ],
    )
    .await
}

async fn create_submission_log_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
            CREATE TABLE IF NOT EXISTS submission_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                submission_id TEXT NOT NULL UNIQUE,
                agency_id INTEGER REFERENCES agencies(id),
                report_id INTEGER REFERENCES reports(id) ON DELETE SET NULL,
                submitted_data TEXT NOT NULL,
                report_status TEXT NOT NULL,
                flag_level TEXT,
                report_warnings TEXT NOT NULL DEFAULT '[]',
                institution_warnings TEXT NOT NULL DEFAULT '[]',
                errors TEXT NOT NULL DEFAULT '[]',
                submission_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#],
    )
    .await
}

/// Seed the fixed vocabulary (identifier resources, QF-EHEA levels)
async fn seed_vocabulary(pool: &SqlitePool) -> Result<()> {
    for resource in IDENTIFIER_RESOURCES {
        sqlx::query("INSERT OR IGNORE INTO identifier_resources (resource) VALUES (?)")
            .bind(resource)
            .execute(pool)
            .await?;
    }

    for (code, level) in QF_EHEA_LEVELS {
        sqlx::query("INSERT OR IGNORE INTO qf_ehea_levels (code, level) VALUES (?, ?)")
            .bind(code)
            .bind(level)
            .execute(pool)
            .await?;
    }

    Ok(())
}

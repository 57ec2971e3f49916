//! Programme reconciliation strategies
//!
//! A report's programmes are rewritten on every submission. The strategy is
//! a trait so a diff-based reconciliation can replace the wholesale one
//! without touching the orchestrator.

use crate::db::programmes::{
    add_programme_country, delete_programmes, insert_programme, insert_programme_name,
};
use crate::error::IngestResult;
use crate::validation::PreparedProgramme;
use async_trait::async_trait;
use sqlx::SqliteConnection;
use tracing::debug;

/// Applies a submission's programme set to a report
#[async_trait]
pub trait ProgrammeStrategy: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        report_id: i64,
        programmes: &[PreparedProgramme],
    ) -> IngestResult<()>;
}

/// Delete all programmes of the report and recreate them from the submission
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceProgrammes;

#[async_trait]
impl ProgrammeStrategy for ReplaceProgrammes {
    fn name(&self) -> &'static str {
        "replace"
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        report_id: i64,
        programmes: &[PreparedProgramme],
    ) -> IngestResult<()> {
        let removed = delete_programmes(conn, report_id).await?;

        for programme in programmes {
            let programme_id = insert_programme(
                conn,
                report_id,
                &programme.name_primary,
                programme.qf_ehea_level.as_ref().map(|l| l.id),
                programme.nqf_level.as_deref(),
                programme.degree_outcome.as_deref(),
            )
            .await?;

            insert_programme_name(
                conn,
                programme_id,
                &programme.name_primary,
                programme.qualification_primary.as_deref(),
                true,
            )
            .await?;

            for alternative in &programme.alternative_names {
                insert_programme_name(
                    conn,
                    programme_id,
                    &alternative.name,
                    alternative.qualification.as_deref(),
                    false,
                )
                .await?;
            }

            for country in &programme.countries {
                add_programme_country(conn, programme_id, country.id).await?;
            }
        }

        debug!(report_id, removed, added = programmes.len(), "Replaced programmes");
        Ok(())
    }
}

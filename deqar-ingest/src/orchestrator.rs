//! Submission Orchestrator
//!
//! Drives one report submission unit end to end inside one transaction:
//! normalize the payload, resolve or create the report, reconcile every
//! institution and platform, replace the programmes, run the flag engine and
//! write the audit record. A failing unit rolls back alone and is recorded
//! as an error outcome; batches continue with the next unit. Events for
//! downstream consumers are emitted only after commit.

use crate::db::reports::{
    find_report_by_local_id, get_report, insert_or_adopt_report, replace_activities, replace_files,
    replace_institutions, replace_links, replace_platforms, update_report, ReportFields,
};
use crate::db::submission_log::{insert_submission_log, NewSubmissionLog};
use crate::error::{IngestError, IngestResult};
use crate::flag_messages::{FlagMessages, LogEntry};
use crate::flagging::{FlagContext, FlagSummary, ReportFlagEngine};
use crate::population::reconcile_institution;
use crate::programmes::{ProgrammeStrategy, ReplaceProgrammes};
use crate::types::SubmissionPayload;
use crate::utils::retry_on_lock;
use crate::validation::{self, PreparedInstitution, PreparedSubmission};
use chrono::NaiveDate;
use deqar_common::config::IngestConfig;
use deqar_common::db::models::{Agency, FlagLevel, ReportFile};
use deqar_common::db::reference::find_agency;
use deqar_common::{EventBus, RegistryEvent};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a unit is matched to an existing report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    /// Always create; an existing local identifier is an error
    Create,
    /// Only update an existing report
    Update,
    /// Update when found, create otherwise
    #[default]
    Upsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Error => "error",
        }
    }
}

/// Per-unit result handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub submission_id: Uuid,
    pub status: OutcomeStatus,
    pub report_id: Option<i64>,
    pub agency: Option<String>,
    pub flag_level: Option<FlagLevel>,
    /// Active report flag messages
    pub report_flags: Vec<String>,
    pub institution_ids: Vec<i64>,
    pub platform_ids: Vec<i64>,
    /// Ordered provenance and conflict log of all institutions
    pub institution_log: Vec<LogEntry>,
    pub errors: Vec<String>,
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    fn failed(submission_id: Uuid, agency: Option<String>, error: &IngestError) -> Self {
        Self {
            submission_id,
            status: OutcomeStatus::Error,
            report_id: None,
            agency,
            flag_level: None,
            report_flags: Vec::new(),
            institution_ids: Vec::new(),
            platform_ids: Vec::new(),
            institution_log: Vec::new(),
            errors: vec![error.to_string()],
        }
    }
}

/// State of a unit after its transaction committed
struct CommittedUnit {
    report_id: i64,
    agency: Agency,
    institution_ids: Vec<i64>,
    platform_ids: Vec<i64>,
    created: Vec<(i64, String)>,
    summary: FlagSummary,
    institution_log: Vec<LogEntry>,
    downloads: Vec<ReportFile>,
}

/// Reconciled institutions or platforms of one unit
#[derive(Default)]
struct LinkedInstitutions {
    ids: Vec<i64>,
    created: Vec<(i64, String)>,
}

pub struct SubmissionOrchestrator<P: ProgrammeStrategy = ReplaceProgrammes> {
    pool: SqlitePool,
    events: EventBus,
    max_lock_wait_ms: u64,
    flag_engine: ReportFlagEngine,
    programmes: P,
    today: NaiveDate,
}

impl SubmissionOrchestrator<ReplaceProgrammes> {
    pub fn new(pool: SqlitePool, events: EventBus, config: &IngestConfig) -> Self {
        Self {
            pool,
            events,
            max_lock_wait_ms: config.max_lock_wait_ms,
            flag_engine: ReportFlagEngine::new(config.flagging.extended_rules),
            programmes: ReplaceProgrammes,
            today: deqar_common::time::today(),
        }
    }
}

impl<P: ProgrammeStrategy> SubmissionOrchestrator<P> {
    /// Swap the programme reconciliation strategy
    pub fn with_programme_strategy<Q: ProgrammeStrategy>(self, programmes: Q) -> SubmissionOrchestrator<Q> {
        SubmissionOrchestrator {
            pool: self.pool,
            events: self.events,
            max_lock_wait_ms: self.max_lock_wait_ms,
            flag_engine: self.flag_engine,
            programmes,
            today: self.today,
        }
    }

    /// Fix the date used for provenance notes and date-dependent flag rules
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.flag_engine = self.flag_engine.with_today(today);
        self.today = today;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Process a JSON object or an array of objects, one unit each
    pub async fn submit_batch(&self, input: serde_json::Value, mode: SubmissionMode) -> Vec<SubmissionOutcome> {
        match input {
            serde_json::Value::Array(units) => {
                let mut outcomes = Vec::with_capacity(units.len());
                for (index, unit) in units.into_iter().enumerate() {
                    let outcome = self.submit(unit, mode).await;
                    if !outcome.is_success() {
                        warn!(index, submission_id = %outcome.submission_id, "Batch unit failed, continuing");
                    }
                    outcomes.push(outcome);
                }
                outcomes
            }
            other => vec![self.submit(other, mode).await],
        }
    }

    /// Process one submission unit
    pub async fn submit(&self, raw: serde_json::Value, mode: SubmissionMode) -> SubmissionOutcome {
        let submission_id = Uuid::new_v4();

        let payload: SubmissionPayload = match serde_json::from_value(raw.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                let error = IngestError::validation(format!("malformed submission: {}", e));
                return self.fail(submission_id, &raw, None, error).await;
            }
        };

        let raw_ref = &raw;
        let payload_ref = &payload;
        let result = retry_on_lock("submission", self.max_lock_wait_ms, move || {
            self.apply_unit(submission_id, raw_ref, payload_ref, mode)
        })
        .await;

        match result {
            Ok(unit) => {
                self.emit_events(submission_id, &unit);
                info!(
                    submission_id = %submission_id,
                    report_id = unit.report_id,
                    agency = %unit.agency.acronym_primary,
                    flag_level = %unit.summary.level,
                    "Submission committed"
                );
                SubmissionOutcome {
                    submission_id,
                    status: OutcomeStatus::Success,
                    report_id: Some(unit.report_id),
                    agency: Some(unit.agency.acronym_primary.clone()),
                    flag_level: Some(unit.summary.level),
                    report_flags: unit.summary.active_messages(),
                    institution_ids: unit.institution_ids,
                    platform_ids: unit.platform_ids,
                    institution_log: unit.institution_log,
                    errors: Vec::new(),
                }
            }
            Err(e) => self.fail(submission_id, &raw, Some(&payload), e).await,
        }
    }

    async fn apply_unit(
        &self,
        submission_id: Uuid,
        raw: &serde_json::Value,
        payload: &SubmissionPayload,
        mode: SubmissionMode,
    ) -> IngestResult<CommittedUnit> {
        let mut tx = self.pool.begin().await?;

        let prepared = validation::prepare(&mut tx, payload).await?;
        let mut messages = FlagMessages::new(prepared.agency.acronym_primary.clone(), self.today);

        let (report_id, files) = self.write_report(&mut tx, &prepared, mode).await?;

        let institutions = link_institutions(&mut tx, &prepared.institutions, &mut messages).await?;
        let platforms = link_institutions(&mut tx, &prepared.platforms, &mut messages).await?;
        replace_institutions(&mut tx, report_id, &institutions.ids).await?;
        replace_platforms(&mut tx, report_id, &platforms.ids).await?;

        debug!(
            report_id,
            strategy = self.programmes.name(),
            programmes = prepared.programmes.len(),
            "Applying programmes"
        );
        self.programmes.apply(&mut tx, report_id, &prepared.programmes).await?;

        let institution_log = messages.take_entries();
        let escalations: Vec<LogEntry> = institution_log
            .iter()
            .filter(|entry| entry.level > FlagLevel::None)
            .cloned()
            .collect();
        if !escalations.is_empty() {
            warn!(
                report_id,
                conflicts = escalations.len(),
                "Institution conflicts escalated to report flags"
            );
        }

        let summary = self
            .flag_engine
            .evaluate(
                &mut tx,
                FlagContext {
                    report_id,
                    agency: &prepared.agency,
                    escalations: &escalations,
                },
            )
            .await?;

        insert_submission_log(
            &mut tx,
            &NewSubmissionLog {
                submission_id,
                agency_id: Some(prepared.agency.id),
                report_id: Some(report_id),
                submitted_data: raw,
                report_status: OutcomeStatus::Success.as_str(),
                flag_level: Some(summary.level.as_str()),
                report_warnings: &summary.active_messages(),
                institution_warnings: &institution_log,
                errors: &[],
            },
        )
        .await?;

        tx.commit().await?;

        let downloads = files
            .into_iter()
            .filter(|f| f.file_path.is_none() && f.file_original_location.is_some())
            .collect();

        let mut created = institutions.created;
        created.extend(platforms.created);

        Ok(CommittedUnit {
            report_id,
            agency: prepared.agency,
            institution_ids: institutions.ids,
            platform_ids: platforms.ids,
            created,
            summary,
            institution_log,
            downloads,
        })
    }

    /// Resolve or create the report and replace its own collections
    async fn write_report(
        &self,
        conn: &mut SqliteConnection,
        prepared: &PreparedSubmission,
        mode: SubmissionMode,
    ) -> IngestResult<(i64, Vec<ReportFile>)> {
        let fields = ReportFields {
            agency_id: prepared.agency.id,
            local_identifier: prepared.local_identifier.as_deref(),
            status: prepared.status,
            decision: prepared.decision,
            valid_from: prepared.valid_from,
            valid_to: prepared.valid_to,
            other_comment: prepared.other_comment.as_deref(),
        };

        let report_id = match find_existing_report(conn, prepared, mode).await? {
            Some(report_id) => {
                update_report(conn, report_id, &fields).await?;
                report_id
            }
            // Another unit may have created the same local identifier since the lookup
            None => insert_or_adopt_report(conn, &fields, mode == SubmissionMode::Upsert).await?,
        };

        replace_activities(conn, report_id, &prepared.activity_ids).await?;
        replace_links(conn, report_id, &prepared.report_links).await?;
        let files = replace_files(conn, report_id, &prepared.report_files).await?;

        Ok((report_id, files))
    }

    fn emit_events(&self, submission_id: Uuid, unit: &CommittedUnit) {
        let timestamp = deqar_common::time::now();

        for (institution_id, deqar_id) in &unit.created {
            self.events.emit_lossy(RegistryEvent::InstitutionCreated {
                institution_id: *institution_id,
                deqar_id: deqar_id.clone(),
                timestamp,
            });
        }

        let mut institution_ids = unit.institution_ids.clone();
        institution_ids.extend(unit.platform_ids.iter().copied());
        institution_ids.sort_unstable();
        institution_ids.dedup();
        self.events.emit_lossy(RegistryEvent::ReportCommitted {
            submission_id,
            report_id: unit.report_id,
            institution_ids,
            flag_level: unit.summary.level.as_str().to_string(),
            timestamp,
        });

        for file in &unit.downloads {
            if let Some(url) = &file.file_original_location {
                self.events.emit_lossy(RegistryEvent::ReportFileDownloadRequested {
                    report_id: unit.report_id,
                    report_file_id: file.id,
                    url: url.clone(),
                });
            }
        }
    }

    /// Record a failed unit; its transaction has already rolled back
    async fn fail(
        &self,
        submission_id: Uuid,
        raw: &serde_json::Value,
        payload: Option<&SubmissionPayload>,
        err: IngestError,
    ) -> SubmissionOutcome {
        if err.is_validation() {
            warn!(submission_id = %submission_id, error = %err, "Submission rejected");
        } else {
            error!(submission_id = %submission_id, error = %err, "Submission failed");
        }

        let agency = match payload {
            Some(payload) => self.lookup_agency(payload).await,
            None => None,
        };
        let outcome = SubmissionOutcome::failed(
            submission_id,
            agency.as_ref().map(|a| a.acronym_primary.clone()),
            &err,
        );

        if let Err(log_err) = self
            .write_error_log(submission_id, raw, agency.as_ref().map(|a| a.id), &outcome.errors)
            .await
        {
            warn!(submission_id = %submission_id, error = %log_err, "Failed to write audit record");
        }

        outcome
    }

    /// Best-effort agency lookup for the audit record of a failed unit
    async fn lookup_agency(&self, payload: &SubmissionPayload) -> Option<Agency> {
        if payload.agency.is_blank() {
            return None;
        }
        let mut conn = self.pool.acquire().await.ok()?;
        find_agency(&mut conn, &payload.agency.as_lookup())
            .await
            .ok()
            .flatten()
    }

    async fn write_error_log(
        &self,
        submission_id: Uuid,
        raw: &serde_json::Value,
        agency_id: Option<i64>,
        errors: &[String],
    ) -> IngestResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_submission_log(
            &mut conn,
            &NewSubmissionLog {
                submission_id,
                agency_id,
                report_id: None,
                submitted_data: raw,
                report_status: OutcomeStatus::Error.as_str(),
                flag_level: None,
                report_warnings: &[],
                institution_warnings: &[],
                errors,
            },
        )
        .await?;
        Ok(())
    }
}

/// Report to update for this unit, or `None` to create one
async fn find_existing_report(
    conn: &mut SqliteConnection,
    prepared: &PreparedSubmission,
    mode: SubmissionMode,
) -> IngestResult<Option<i64>> {
    if let Some(report_id) = prepared.report_id {
        if mode == SubmissionMode::Create {
            return Err(IngestError::validation(
                "report_id: must not be set when creating a report",
            ));
        }
        let report = get_report(conn, report_id)
            .await?
            .ok_or_else(|| IngestError::validation(format!("report_id: report {} not found", report_id)))?;
        if report.agency_id != prepared.agency.id {
            return Err(IngestError::validation(format!(
                "report_id: report {} belongs to another agency",
                report_id
            )));
        }
        return Ok(Some(report_id));
    }

    let found = match &prepared.local_identifier {
        Some(local_id) => find_report_by_local_id(conn, prepared.agency.id, local_id).await?,
        None => None,
    };

    match (mode, found) {
        (SubmissionMode::Create, Some(report)) => Err(IngestError::validation(format!(
            "local_identifier: report {} already exists",
            report.local_identifier.unwrap_or_default()
        ))),
        (SubmissionMode::Update, None) => Err(IngestError::validation(
            "update requires report_id or the local identifier of an existing report",
        )),
        (_, found) => Ok(found.map(|report| report.id)),
    }
}

async fn link_institutions(
    conn: &mut SqliteConnection,
    institutions: &[PreparedInstitution],
    messages: &mut FlagMessages,
) -> IngestResult<LinkedInstitutions> {
    let mut linked = LinkedInstitutions::default();
    for institution in institutions {
        let reconciled = reconcile_institution(conn, institution, messages).await?;
        if let Some(deqar_id) = reconciled.created_deqar_id {
            linked.created.push((reconciled.institution_id, deqar_id));
        }
        if !linked.ids.contains(&reconciled.institution_id) {
            linked.ids.push(reconciled.institution_id);
        }
    }
    Ok(linked)
}

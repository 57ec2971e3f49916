//! Report Flag Engine
//!
//! Every pass starts from scratch: all flags of the report are marked
//! inactive and its level reset to `none`. The rules are then evaluated in
//! fixed order. Raising a flag creates it or reactivates the existing row,
//! except for rows a reviewer removed, which stay inactive. The report
//! level is the highest level among the flags that ended up active, so it
//! only ever rises during a pass.

use crate::db::reports::{
    self, in_ehea_country, level_count, linked_country_ids, linked_institution_ids,
    programme_country_ids, programme_levels, report_files, report_institution_ids, reset_flags,
    set_flag_level, upsert_flag, verified_level_ids,
};
use crate::db::institutions::get_institution;
use crate::error::{IngestError, IngestResult};
use crate::flag_messages::{render, FlagTemplate, LogEntry};
use chrono::{Months, NaiveDate};
use deqar_common::db::models::{Agency, FlagLevel, ReportStatus};
use deqar_common::db::reference::{ensure_crossborder_focus_country, find_focus_country, get_country};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Reports without an end date older than this get a validity flag
const VALIDITY_MONTHS: u32 = 72;

/// Input of one flagging pass
#[derive(Debug, Clone, Copy)]
pub struct FlagContext<'a> {
    pub report_id: i64,
    pub agency: &'a Agency,
    /// Low-severity reconciliation conflicts logged while populating institutions
    pub escalations: &'a [LogEntry],
}

/// A flag raised during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedFlag {
    pub level: FlagLevel,
    pub message: String,
    /// False when a reviewer had removed this flag
    pub active: bool,
}

/// Result of one flagging pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagSummary {
    pub level: FlagLevel,
    pub raised: Vec<RaisedFlag>,
    /// Countries added to the agency's focus list as cross-border
    pub focus_countries_added: Vec<i64>,
}

impl FlagSummary {
    pub fn active_messages(&self) -> Vec<String> {
        self.raised
            .iter()
            .filter(|f| f.active)
            .map(|f| f.message.clone())
            .collect()
    }

    fn raise(&mut self, level: FlagLevel, message: String, active: bool) {
        if active {
            self.level = self.level.max(level);
        }
        if !self.raised.iter().any(|f| f.level == level && f.message == message) {
            self.raised.push(RaisedFlag {
                level,
                message,
                active,
            });
        }
    }
}

/// Rule evaluator for report flags
#[derive(Debug, Clone)]
pub struct ReportFlagEngine {
    extended_rules: bool,
    today: NaiveDate,
}

impl ReportFlagEngine {
    pub fn new(extended_rules: bool) -> Self {
        Self {
            extended_rules,
            today: deqar_common::time::today(),
        }
    }

    /// Evaluate date-dependent rules against a fixed day
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Run a full flagging pass and persist the resulting level
    pub async fn evaluate(
        &self,
        conn: &mut SqliteConnection,
        ctx: FlagContext<'_>,
    ) -> IngestResult<FlagSummary> {
        let report = reports::get_report(conn, ctx.report_id).await?.ok_or_else(|| {
            IngestError::Common(deqar_common::Error::NotFound(format!("report {}", ctx.report_id)))
        })?;
        let obligatory = report.status.parse::<ReportStatus>().ok() == Some(ReportStatus::Obligatory);

        reset_flags(conn, ctx.report_id).await?;
        let mut summary = FlagSummary::default();

        self.check_focus_countries(conn, &ctx, obligatory, &mut summary).await?;
        self.check_programme_countries(conn, &ctx, &mut summary).await?;
        self.check_programme_levels(conn, &ctx, &mut summary).await?;
        self.check_report_files(conn, &ctx, &mut summary).await?;

        for entry in ctx.escalations.iter().filter(|e| e.level > FlagLevel::None) {
            self.raise(conn, &ctx, &mut summary, FlagLevel::Low, entry.message.clone())
                .await?;
        }

        if self.extended_rules {
            self.check_validity(conn, &ctx, &report.valid_from, report.valid_to.as_deref(), &mut summary)
                .await?;
            self.check_ehea_levels(conn, &ctx, &mut summary).await?;
        }

        set_flag_level(conn, ctx.report_id, summary.level).await?;
        info!(
            report_id = ctx.report_id,
            flag_level = %summary.level,
            flags = summary.raised.len(),
            "Flagging pass complete"
        );
        Ok(summary)
    }

    async fn raise(
        &self,
        conn: &mut SqliteConnection,
        ctx: &FlagContext<'_>,
        summary: &mut FlagSummary,
        level: FlagLevel,
        message: String,
    ) -> IngestResult<()> {
        let active = upsert_flag(conn, ctx.report_id, level, &message).await?;
        if !active {
            debug!(report_id = ctx.report_id, message = %message, "Flag stays removed by EQAR");
        }
        summary.raise(level, message, active);
        Ok(())
    }

    /// Focus-country rules
    ///
    /// A country outside the agency's focus list is added as cross-border
    /// (LOW). A country whose focus record is not official makes an
    /// obligatory report HIGH.
    async fn check_focus_countries(
        &self,
        conn: &mut SqliteConnection,
        ctx: &FlagContext<'_>,
        obligatory: bool,
        summary: &mut FlagSummary,
    ) -> IngestResult<()> {
        let mut countries: BTreeSet<i64> = linked_country_ids(conn, ctx.report_id).await?.into_iter().collect();
        countries.extend(programme_country_ids(conn, ctx.report_id).await?);

        let agency = &ctx.agency.acronym_primary;
        for country_id in countries {
            let country = get_country(conn, country_id).await?;

            let focus = match find_focus_country(conn, ctx.agency.id, country_id).await? {
                Some(focus) => focus,
                None => {
                    let (focus, created) =
                        ensure_crossborder_focus_country(conn, ctx.agency.id, country_id).await?;
                    if created {
                        summary.focus_countries_added.push(country_id);
                    }
                    let message = render(FlagTemplate::FocusCountryAdded, &country.name_english, agency);
                    self.raise(conn, ctx, summary, FlagLevel::Low, message).await?;
                    focus
                }
            };

            if obligatory && !focus.country_is_official {
                let message = render(FlagTemplate::FocusCountryNotOfficial, &country.name_english, agency);
                self.raise(conn, ctx, summary, FlagLevel::High, message).await?;
            }
        }
        Ok(())
    }

    async fn check_programme_countries(
        &self,
        conn: &mut SqliteConnection,
        ctx: &FlagContext<'_>,
        summary: &mut FlagSummary,
    ) -> IngestResult<()> {
        let institution_countries = linked_country_ids(conn, ctx.report_id).await?;
        for country_id in programme_country_ids(conn, ctx.report_id).await? {
            if institution_countries.contains(&country_id) {
                continue;
            }
            let country = get_country(conn, country_id).await?;
            let message = render(
                FlagTemplate::ProgrammeCountryNotInInstitution,
                &country.name_english,
                &ctx.agency.acronym_primary,
            );
            self.raise(conn, ctx, summary, FlagLevel::Low, message).await?;
        }
        Ok(())
    }

    /// A programme level an institution has verified other levels for, but not this one
    async fn check_programme_levels(
        &self,
        conn: &mut SqliteConnection,
        ctx: &FlagContext<'_>,
        summary: &mut FlagSummary,
    ) -> IngestResult<()> {
        let levels = programme_levels(conn, ctx.report_id).await?;
        if levels.is_empty() {
            return Ok(());
        }

        for institution_id in report_institution_ids(conn, ctx.report_id).await? {
            let verified = verified_level_ids(conn, institution_id).await?;
            if verified.is_empty() {
                continue;
            }
            for (level_id, level) in &levels {
                if !verified.contains(level_id) {
                    let message = render(
                        FlagTemplate::ProgrammeLevelNotInInstitution,
                        level,
                        &ctx.agency.acronym_primary,
                    );
                    self.raise(conn, ctx, summary, FlagLevel::High, message).await?;
                }
            }
        }
        Ok(())
    }

    async fn check_report_files(
        &self,
        conn: &mut SqliteConnection,
        ctx: &FlagContext<'_>,
        summary: &mut FlagSummary,
    ) -> IngestResult<()> {
        for file in report_files(conn, ctx.report_id).await? {
            if file.file_path.is_some() || file.file_original_location.is_some() {
                continue;
            }
            let name = file
                .file_display_name
                .clone()
                .unwrap_or_else(|| format!("#{}", file.id));
            let message = render(FlagTemplate::ReportFileMissing, &name, &ctx.agency.acronym_primary);
            self.raise(conn, ctx, summary, FlagLevel::Low, message).await?;
        }
        Ok(())
    }

    async fn check_validity(
        &self,
        conn: &mut SqliteConnection,
        ctx: &FlagContext<'_>,
        valid_from: &str,
        valid_to: Option<&str>,
        summary: &mut FlagSummary,
    ) -> IngestResult<()> {
        if valid_to.is_some() {
            return Ok(());
        }
        let Some(from) = deqar_common::time::parse_date(valid_from) else {
            return Ok(());
        };
        let expired = from
            .checked_add_months(Months::new(VALIDITY_MONTHS))
            .map_or(false, |limit| limit < self.today);
        if expired {
            let message = render(FlagTemplate::ReportValidityExpired, valid_from, &ctx.agency.acronym_primary);
            self.raise(conn, ctx, summary, FlagLevel::Low, message).await?;
        }
        Ok(())
    }

    async fn check_ehea_levels(
        &self,
        conn: &mut SqliteConnection,
        ctx: &FlagContext<'_>,
        summary: &mut FlagSummary,
    ) -> IngestResult<()> {
        for institution_id in linked_institution_ids(conn, ctx.report_id).await? {
            if level_count(conn, institution_id).await? > 0 || !in_ehea_country(conn, institution_id).await? {
                continue;
            }
            let institution = get_institution(conn, institution_id).await?;
            let label = institution
                .deqar_id
                .clone()
                .unwrap_or_else(|| institution.name_primary.clone());
            let message = render(FlagTemplate::EheaLevelsMissing, &label, &ctx.agency.acronym_primary);
            self.raise(conn, ctx, summary, FlagLevel::Low, message).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_level_is_monotonic() {
        let mut summary = FlagSummary::default();
        summary.raise(FlagLevel::High, "high".to_string(), true);
        summary.raise(FlagLevel::Low, "low".to_string(), true);
        assert_eq!(summary.level, FlagLevel::High);
    }

    #[test]
    fn test_inactive_flags_do_not_raise_level() {
        let mut summary = FlagSummary::default();
        summary.raise(FlagLevel::High, "removed".to_string(), false);
        summary.raise(FlagLevel::Low, "kept".to_string(), true);
        assert_eq!(summary.level, FlagLevel::Low);
        assert_eq!(summary.active_messages(), vec!["kept".to_string()]);
    }

    #[test]
    fn test_same_flag_recorded_once() {
        let mut summary = FlagSummary::default();
        summary.raise(FlagLevel::Low, "dup".to_string(), true);
        summary.raise(FlagLevel::Low, "dup".to_string(), true);
        assert_eq!(summary.raised.len(), 1);
    }
}

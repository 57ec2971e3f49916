//! deqar-ingest library interface
//!
//! Submission reconciliation and flagging core: entity resolution,
//! conflict-tolerant population, report flag evaluation and the per-unit
//! orchestrator that ties them together.

pub mod db;
pub mod error;
pub mod flag_messages;
pub mod flagging;
pub mod orchestrator;
pub mod population;
pub mod programmes;
pub mod reference_import;
pub mod resolver;
pub mod types;
pub mod utils;
pub mod validation;

pub use crate::error::{IngestError, IngestResult};
pub use crate::orchestrator::{OutcomeStatus, SubmissionMode, SubmissionOrchestrator, SubmissionOutcome};

//! Registry writes and queries used by the reconciliation core
//!
//! Schema and reference-data lookups live in `deqar_common::db`; everything
//! here takes a `SqliteConnection` so it runs inside a unit's transaction.

pub mod institutions;
pub mod programmes;
pub mod reports;
pub mod submission_log;

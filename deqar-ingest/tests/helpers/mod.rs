//! Test Helper Utilities
//!
//! Shared utilities for testing deqar-ingest

#![allow(dead_code)]

pub mod db_utils;
pub mod payloads;

// Re-export commonly used items
pub use db_utils::{
    add_institution, count_rows, create_test_db, seed_registry, test_orchestrator,
    test_orchestrator_with, Registry,
    TODAY,
};
pub use payloads::{report_payload, with_institutions};

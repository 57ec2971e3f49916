//! # DEQAR Common Library
//!
//! Shared code for the DEQAR registry services including:
//! - Database initialization and schema
//! - Registry row models (institutions, agencies, reports, flags)
//! - Reference vocabulary lookups
//! - Configuration loading
//! - Post-commit event bus

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, RegistryEvent};

//! Database models, schema and reference data

pub mod init;
pub mod models;
pub mod reference;

pub use init::*;
pub use models::*;

//! Shared types for the lookbook generation pipeline
//!
//! Contains the data model exchanged between the pipeline core and its
//! collaborators (generation service, asset store, report sink), plus the
//! tracing setup used by every binary in the workspace.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;

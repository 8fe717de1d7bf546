//! callscribe - live call transcription pipeline
//!
//! Tracks telephony call sessions and their media streams, fans live
//! transcript segments out to subscribers, and persists each call's record,
//! summary and extracted location once the call ends.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;

//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Entity store, storage gateway and repository implementations
//! - Metric descriptions

pub mod persistence;
pub mod telemetry;

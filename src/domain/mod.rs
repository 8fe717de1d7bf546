//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Aggregates: Consistency boundaries
//! - Entities: Objects with identity
//! - Value Objects: Immutable objects without identity
//! - Repository Interfaces: Ports for persistence
//! - Inbound Events: Provider and speech-engine notifications

pub mod call;
pub mod shared;
pub mod transcript;

// Re-export commonly used types
pub use shared::{DomainError, Result};

//! Persistence implementations

pub mod codec;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod repository;
pub mod retry;
pub mod store;

pub use codec::{partition_key, TableRecord};
pub use entity::{EntityProperty, TableEntity};
pub use error::StorageError;
pub use gateway::StorageGateway;
pub use repository::{
    TableCallRepository, TableLocationRepository, TableRepository, TableSummaryRepository,
};
pub use retry::RetryPolicy;
pub use store::{open_store, EntityStore, InMemoryEntityStore};

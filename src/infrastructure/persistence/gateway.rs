//! Storage gateway
//!
//! Typed upsert/get over an [`EntityStore`], with the retry policy applied
//! to transient faults.

use super::codec::{partition_key, TableRecord};
use super::error::StorageError;
use super::retry::RetryPolicy;
use super::store::{mask_password, open_store, EntityStore};
use crate::config::StorageConfig;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct StorageGateway {
    store: Arc<dyn EntityStore>,
    retry: RetryPolicy,
}

impl StorageGateway {
    /// Wrap an existing store, validating the configuration eagerly
    pub fn new(store: Arc<dyn EntityStore>, config: &StorageConfig) -> Result<Self, StorageError> {
        validate(config)?;
        info!(
            "Storage gateway ready: {} (retry attempts: {})",
            mask_password(&config.connection),
            config.retry.max_attempts
        );

        Ok(Self {
            store,
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    /// Open the store named by `config.connection` and wrap it
    pub fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        validate(config)?;
        let store = open_store(&config.connection)?;
        Self::new(store, config)
    }

    /// Create or replace `record` in `table`
    pub async fn upsert<T: TableRecord>(&self, table: &str, record: &T) -> Result<(), StorageError> {
        let entity = record.encode();
        debug!(
            table,
            partition_key = %entity.partition_key,
            row_key = %entity.row_key,
            "Upserting record"
        );

        let operation = format!("upsert {}/{}", table, T::ROW_KEY);
        self.retry
            .run(&operation, || self.store.upsert(table, entity.clone()))
            .await
            .map_err(|e| {
                error!("Failed to {}: {}", operation, e);
                e
            })
    }

    /// Point read of the record for `call_sid`
    pub async fn get<T: TableRecord>(&self, table: &str, call_sid: &str) -> Result<Option<T>, StorageError> {
        let partition_key = partition_key(call_sid);
        let operation = format!("get {}/{}", table, T::ROW_KEY);

        let entity = self
            .retry
            .run(&operation, || self.store.get(table, &partition_key, T::ROW_KEY))
            .await
            .map_err(|e| {
                error!("Failed to {}: {}", operation, e);
                e
            })?;

        entity.as_ref().map(T::decode).transpose()
    }
}

fn validate(config: &StorageConfig) -> Result<(), StorageError> {
    if config.connection.trim().is_empty() {
        return Err(StorageError::Configuration(
            "storage connection target is empty".to_string(),
        ));
    }

    for (name, table) in [
        ("call_table", &config.call_table),
        ("summary_table", &config.summary_table),
        ("location_table", &config.location_table),
    ] {
        if table.trim().is_empty() {
            return Err(StorageError::Configuration(format!("{} is empty", name)));
        }
    }

    Ok(())
}

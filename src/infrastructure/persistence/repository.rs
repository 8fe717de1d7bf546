//! Table-backed implementations of the call and transcript repositories

use super::codec::TableRecord;
use super::gateway::StorageGateway;
use crate::domain::call::{CallRecord, CallRepository};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::transcript::{
    LocationExtractionResult, LocationRepository, SummaryRepository, TranscriptSummary,
};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Repository storing one `T` per call in a single table
pub struct TableRepository<T> {
    gateway: Arc<StorageGateway>,
    table: String,
    _record: PhantomData<fn() -> T>,
}

pub type TableCallRepository = TableRepository<CallRecord>;
pub type TableSummaryRepository = TableRepository<TranscriptSummary>;
pub type TableLocationRepository = TableRepository<LocationExtractionResult>;

impl<T: TableRecord> TableRepository<T> {
    pub fn new(gateway: Arc<StorageGateway>, table: impl Into<String>) -> Self {
        Self {
            gateway,
            table: table.into(),
            _record: PhantomData,
        }
    }

    async fn upsert_record(&self, record: &T) -> Result<()> {
        if record.call_sid().trim().is_empty() {
            return Err(DomainError::ArgumentNull(format!(
                "{} record has no CallSid",
                T::ROW_KEY
            )));
        }

        self.gateway.upsert(&self.table, record).await?;
        debug!("Upserted {} for call {}", T::ROW_KEY, record.call_sid());
        Ok(())
    }

    async fn find(&self, call_sid: &str) -> Result<Option<T>> {
        if call_sid.trim().is_empty() {
            return Err(DomainError::ArgumentInvalid(
                "call_sid must not be empty".to_string(),
            ));
        }

        Ok(self.gateway.get::<T>(&self.table, call_sid).await?)
    }
}

#[async_trait]
impl CallRepository for TableRepository<CallRecord> {
    async fn upsert(&self, record: &CallRecord) -> Result<()> {
        self.upsert_record(record).await
    }

    async fn get_by_call_sid(&self, call_sid: &str) -> Result<Option<CallRecord>> {
        self.find(call_sid).await
    }
}

#[async_trait]
impl SummaryRepository for TableRepository<TranscriptSummary> {
    async fn upsert(&self, summary: &TranscriptSummary) -> Result<()> {
        self.upsert_record(summary).await
    }

    async fn get_by_call_sid(&self, call_sid: &str) -> Result<Option<TranscriptSummary>> {
        self.find(call_sid).await
    }
}

#[async_trait]
impl LocationRepository for TableRepository<LocationExtractionResult> {
    async fn upsert(&self, location: &LocationExtractionResult) -> Result<()> {
        location.validate()?;
        self.upsert_record(location).await
    }

    async fn get_by_call_sid(&self, call_sid: &str) -> Result<Option<LocationExtractionResult>> {
        self.find(call_sid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::infrastructure::persistence::entity::TableEntity;
    use crate::infrastructure::persistence::store::{EntityStore, InMemoryEntityStore};

    fn setup() -> (Arc<InMemoryEntityStore>, Arc<StorageGateway>) {
        let store = Arc::new(InMemoryEntityStore::new());
        let gateway = StorageGateway::new(store.clone(), &Config::default().storage).unwrap();
        (store, Arc::new(gateway))
    }

    #[tokio::test]
    async fn test_summary_round_trip_keeps_empty_list() {
        let (_, gateway) = setup();
        let repo = TableSummaryRepository::new(gateway, "summaries");

        let summary = TranscriptSummary::new("CA123", "Caller asked for help", vec![]);
        repo.upsert(&summary).await.unwrap();

        let loaded = repo.get_by_call_sid("ca123").await.unwrap().unwrap();
        assert_eq!(loaded, summary);
        assert!(loaded.key_findings.is_empty());
    }

    #[tokio::test]
    async fn test_get_validates_call_sid() {
        let (_, gateway) = setup();
        let repo = TableCallRepository::new(gateway, "calls");

        assert!(matches!(
            repo.get_by_call_sid("").await,
            Err(DomainError::ArgumentInvalid(_))
        ));
        assert_eq!(repo.get_by_call_sid("CA999").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_without_identity_is_argument_null() {
        let (_, gateway) = setup();
        let repo = TableSummaryRepository::new(gateway, "summaries");
        let summary = TranscriptSummary::new("  ", "text", vec![]);

        assert!(matches!(
            repo.upsert(&summary).await,
            Err(DomainError::ArgumentNull(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_findings_read_as_empty() {
        let (store, gateway) = setup();
        let repo = TableSummaryRepository::new(gateway, "summaries");

        let entity = TableEntity::new("ca7", "summary")
            .with("CallSid", "CA7")
            .with("Summary", "partial")
            .with("KeyFindings", "{broken")
            .with("GeneratedAtUtc", chrono::Utc::now());
        store.upsert("summaries", entity).await.unwrap();

        let loaded = repo.get_by_call_sid("CA7").await.unwrap().unwrap();
        assert_eq!(loaded.summary, "partial");
        assert!(loaded.key_findings.is_empty());
    }

    #[tokio::test]
    async fn test_location_rejects_half_coordinates() {
        let (_, gateway) = setup();
        let repo = TableLocationRepository::new(gateway, "locations");

        let mut location = LocationExtractionResult::from_text("CA1", "5 Elm Road");
        location.latitude = Some(10.0);
        assert!(matches!(
            repo.upsert(&location).await,
            Err(DomainError::ArgumentInvalid(_))
        ));
    }
}

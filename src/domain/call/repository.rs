//! Call repository interface

use crate::domain::call::record::CallRecord;
use crate::domain::shared::result::Result;
use async_trait::async_trait;

/// Repository interface for persisted call records
///
/// This is defined in the domain layer as a trait (port),
/// and implemented in the infrastructure layer (adapter).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallRepository: Send + Sync {
    /// Create or replace the record for its call
    async fn upsert(&self, record: &CallRecord) -> Result<()>;

    /// Find a record by call SID; `Ok(None)` when nothing is stored
    async fn get_by_call_sid(&self, call_sid: &str) -> Result<Option<CallRecord>>;
}

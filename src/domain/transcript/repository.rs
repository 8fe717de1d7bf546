//! Transcript insight repository interfaces

use crate::domain::shared::result::Result;
use crate::domain::transcript::location::LocationExtractionResult;
use crate::domain::transcript::summary::TranscriptSummary;
use async_trait::async_trait;

/// Repository interface for transcript summaries
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SummaryRepository: Send + Sync {
    /// Create or replace the summary for its call
    async fn upsert(&self, summary: &TranscriptSummary) -> Result<()>;

    /// Find a summary by call SID; `Ok(None)` when nothing is stored
    async fn get_by_call_sid(&self, call_sid: &str) -> Result<Option<TranscriptSummary>>;
}

/// Repository interface for extracted locations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationRepository: Send + Sync {
    /// Create or replace the location for its call
    async fn upsert(&self, location: &LocationExtractionResult) -> Result<()>;

    /// Find a location by call SID; `Ok(None)` when nothing is stored
    async fn get_by_call_sid(&self, call_sid: &str) -> Result<Option<LocationExtractionResult>>;
}

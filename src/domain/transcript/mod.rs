//! Transcript bounded context - live segments and the insights derived from them

pub mod location;
pub mod repository;
pub mod segment;
pub mod summary;

pub use location::LocationExtractionResult;
pub use repository::{LocationRepository, SummaryRepository};
pub use segment::{SequencedSegment, TranscriptionSegment};
pub use summary::TranscriptSummary;

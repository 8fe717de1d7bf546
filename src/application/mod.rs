//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases:
//! - Tracking live call sessions and their media streams
//! - Fanning transcript segments out to subscribers
//! - Finalizing closed calls into durable records and insights

pub mod distributor;
pub mod finalizer;
pub mod insight;
pub mod pipeline;
pub mod registry;

pub use distributor::{PublishOutcome, PublishReceipt, TranscriptChannel, TranscriptDistributor};
pub use finalizer::{FinalizationJob, FinalizationOutcome, InsightFinalizer, TranscriptBuffer};
pub use insight::{InsightGenerator, Insights, KeywordInsightGenerator};
pub use pipeline::{CallPipeline, InboundEvent, IngestOutcome};
pub use registry::{CallSessionRegistry, Subscription, SubscriptionHandle};

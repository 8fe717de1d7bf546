//! Call bounded context - manages the lifecycle of calls and their media streams

pub mod aggregate;
pub mod entity;
pub mod event;
pub mod record;
pub mod repository;
pub mod value_object;

pub use aggregate::{CallSession, StatusChange};
pub use entity::MediaStream;
pub use event::{CallLifecycleEvent, StreamEvent};
pub use record::CallRecord;
pub use repository::CallRepository;
pub use value_object::{CallDirection, CallStatus, FinalizationState, StreamStatus};

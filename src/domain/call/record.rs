//! Persisted call record
//!
//! The durable snapshot of a call session written at finalization.

use crate::domain::call::aggregate::CallSession;
use crate::domain::call::value_object::{CallDirection, CallStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable call record, one per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub account_sid: Option<String>,
    /// Streams bound during the call, oldest first
    pub stream_sids: Vec<String>,
}

impl From<&CallSession> for CallRecord {
    fn from(session: &CallSession) -> Self {
        Self {
            call_sid: session.call_sid().as_str().to_string(),
            from: session.from().to_string(),
            to: session.to().to_string(),
            direction: session.direction(),
            status: session.status(),
            started_at: session.started_at(),
            completed_at: session.completed_at(),
            duration_seconds: session.duration_seconds(),
            account_sid: session.account_sid().map(str::to_string),
            stream_sids: session
                .stream_history()
                .iter()
                .map(|sid| sid.as_str().to_string())
                .collect(),
        }
    }
}

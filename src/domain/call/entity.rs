//! Call entities

use crate::domain::call::value_object::StreamStatus;
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live audio channel bound to a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStream {
    stream_sid: StreamSid,
    /// Lookup only; the session owns the stream, not the other way round
    call_sid: CallSid,
    status: StreamStatus,
    started_at: DateTime<Utc>,
    stopped_at: Option<DateTime<Utc>>,
}

impl MediaStream {
    pub fn start(stream_sid: StreamSid, call_sid: CallSid, started_at: DateTime<Utc>) -> Self {
        Self {
            stream_sid,
            call_sid,
            status: StreamStatus::Started,
            started_at,
            stopped_at: None,
        }
    }

    pub fn stop(&mut self, stopped_at: DateTime<Utc>) {
        self.status = StreamStatus::Stopped;
        self.stopped_at = Some(stopped_at);
    }

    pub fn stream_sid(&self) -> &StreamSid {
        &self.stream_sid
    }

    pub fn call_sid(&self) -> &CallSid {
        &self.call_sid
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    pub fn is_active(&self) -> bool {
        self.status == StreamStatus::Started
    }
}

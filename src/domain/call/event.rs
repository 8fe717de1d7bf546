//! Inbound call and stream lifecycle events

use crate::domain::call::value_object::{CallDirection, CallStatus, StreamStatus};
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call status callback from the telephony provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallLifecycleEvent {
    pub call_sid: CallSid,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub status: CallStatus,
    #[serde(default = "default_direction")]
    pub direction: CallDirection,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub account_sid: Option<String>,
}

fn default_direction() -> CallDirection {
    CallDirection::Inbound
}

impl CallLifecycleEvent {
    pub fn new(call_sid: CallSid, status: CallStatus) -> Self {
        Self {
            call_sid,
            from: String::new(),
            to: String::new(),
            status,
            direction: CallDirection::Inbound,
            timestamp: Utc::now(),
            account_sid: None,
        }
    }

    pub fn with_parties(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from = from.into();
        self.to = to.into();
        self
    }

    pub fn with_direction(mut self, direction: CallDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_account(mut self, account_sid: impl Into<String>) -> Self {
        self.account_sid = Some(account_sid.into());
        self
    }
}

/// Media stream start/stop notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamEvent {
    pub stream_sid: StreamSid,
    pub call_sid: CallSid,
    pub status: StreamStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    pub fn started(call_sid: CallSid, stream_sid: StreamSid) -> Self {
        Self {
            stream_sid,
            call_sid,
            status: StreamStatus::Started,
            timestamp: Utc::now(),
        }
    }

    pub fn stopped(call_sid: CallSid, stream_sid: StreamSid) -> Self {
        Self {
            stream_sid,
            call_sid,
            status: StreamStatus::Stopped,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

//! Call value objects

use crate::domain::shared::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Inbound call from external
    Inbound,
    /// Outbound call placed by the provider
    #[serde(alias = "outbound-api", alias = "outbound-dial")]
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

impl FromStr for CallDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(CallDirection::Inbound),
            "outbound" | "outbound-api" | "outbound-dial" => Ok(CallDirection::Outbound),
            other => Err(DomainError::ArgumentInvalid(format!(
                "unknown call direction: {}",
                other
            ))),
        }
    }
}

/// Call status as reported by the telephony provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "ringing")]
    Ringing,
    #[serde(rename = "in-progress", alias = "in_progress", alias = "answered")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed", alias = "busy", alias = "no-answer")]
    Failed,
    #[serde(rename = "canceled", alias = "cancelled")]
    Canceled,
}

impl CallStatus {
    /// Check if state transition is valid
    ///
    /// Same-status moves are not transitions; callers treat them as duplicates.
    pub fn can_transition_to(&self, new_status: &CallStatus) -> bool {
        use CallStatus::*;

        match (self, new_status) {
            // From Queued (Ringing may be skipped)
            (Queued, Ringing) => true,
            (Queued, InProgress) => true,
            (Queued, Failed | Canceled) => true,

            // From Ringing
            (Ringing, InProgress) => true,
            (Ringing, Failed | Canceled) => true,

            // From InProgress
            (InProgress, Completed | Failed | Canceled) => true,

            // Terminal states absorb everything
            (Completed | Failed | Canceled, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Failed | CallStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Queued => "queued",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for CallStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CallStatus::Queued),
            "ringing" => Ok(CallStatus::Ringing),
            "in-progress" | "in_progress" | "answered" => Ok(CallStatus::InProgress),
            "completed" => Ok(CallStatus::Completed),
            "failed" | "busy" | "no-answer" => Ok(CallStatus::Failed),
            "canceled" | "cancelled" => Ok(CallStatus::Canceled),
            other => Err(DomainError::ArgumentInvalid(format!(
                "unknown call status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media stream status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    #[serde(rename = "started", alias = "start")]
    Started,
    #[serde(rename = "stopped", alias = "stop")]
    Stopped,
}

/// Progress of the one-time insight hand-off for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationState {
    NotStarted,
    Pending,
    Persisted,
    Failed,
}

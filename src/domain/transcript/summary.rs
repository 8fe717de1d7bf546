//! Transcript summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary derived from a call's final transcript, one per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSummary {
    pub call_sid: String,
    pub summary: String,
    /// Ordered, possibly empty
    pub key_findings: Vec<String>,
    pub generated_at_utc: DateTime<Utc>,
}

impl TranscriptSummary {
    pub fn new(call_sid: impl Into<String>, summary: impl Into<String>, key_findings: Vec<String>) -> Self {
        Self {
            call_sid: call_sid.into(),
            summary: summary.into(),
            key_findings,
            generated_at_utc: Utc::now(),
        }
    }
}

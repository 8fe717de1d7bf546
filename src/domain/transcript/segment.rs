//! Transcription segments

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of speech-to-text output for a call
///
/// Interim segments (`is_final == false`) may be revised by later ones;
/// final segments never are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscriptionSegment {
    pub call_sid: CallSid,
    pub stream_sid: StreamSid,
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default = "Utc::now")]
    pub timestamp_utc: DateTime<Utc>,
    /// Optional per-stream sequence from the speech engine, used to drop redeliveries
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl TranscriptionSegment {
    pub fn interim(call_sid: CallSid, stream_sid: StreamSid, text: impl Into<String>) -> Self {
        Self {
            call_sid,
            stream_sid,
            text: text.into(),
            is_final: false,
            confidence: None,
            timestamp_utc: Utc::now(),
            sequence: None,
        }
    }

    pub fn final_text(call_sid: CallSid, stream_sid: StreamSid, text: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::interim(call_sid, stream_sid, text)
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp_utc = timestamp;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(DomainError::ArgumentInvalid(format!(
                    "confidence {} outside 0..1",
                    confidence
                )));
            }
        }
        Ok(())
    }
}

/// A segment stamped with its per-call delivery position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedSegment {
    /// Monotonic per call, starting at 1
    pub sequence: u64,
    pub segment: TranscriptionSegment,
}

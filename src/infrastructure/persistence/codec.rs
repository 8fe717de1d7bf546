//! Entity codec
//!
//! Maps domain records to [`TableEntity`] and back. Every aggregate lives
//! at `(lowercase(call_sid), <fixed row key>)`, so one entity per call per
//! aggregate type is guaranteed by the addressing itself.
//!
//! Reads are lenient for auxiliary data: a malformed list, an unknown enum
//! string or a half-present coordinate pair degrades to an empty/default
//! value instead of failing the whole record.

use super::entity::TableEntity;
use super::error::StorageError;
use crate::domain::call::{CallDirection, CallRecord, CallStatus};
use crate::domain::transcript::{LocationExtractionResult, TranscriptSummary};
use tracing::warn;

pub const CALL_ROW_KEY: &str = "call";
pub const SUMMARY_ROW_KEY: &str = "summary";
pub const LOCATION_ROW_KEY: &str = "location";

/// Record type stored as one entity per call
pub trait TableRecord: Sized + Send + Sync {
    /// Fixed row key for this aggregate type
    const ROW_KEY: &'static str;

    fn call_sid(&self) -> &str;

    fn encode(&self) -> TableEntity;

    fn decode(entity: &TableEntity) -> Result<Self, StorageError>;
}

/// Lowercase-normalized partition key for a call SID
pub fn partition_key(call_sid: &str) -> String {
    call_sid.trim().to_lowercase()
}

pub fn encode_list(items: &[String]) -> String {
    // Serializing a slice of strings cannot fail
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a JSON-encoded list field, falling back to an empty list
pub fn decode_list(entity: &TableEntity, field: &str) -> Vec<String> {
    let Some(raw) = entity.get_str(field) else {
        return Vec::new();
    };

    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(items) => items,
        Err(e) => {
            warn!(
                partition_key = %entity.partition_key,
                field,
                "Malformed list field, reading as empty: {}",
                e
            );
            Vec::new()
        }
    }
}

fn stored_call_sid(entity: &TableEntity) -> String {
    entity
        .get_str("CallSid")
        .map(str::to_string)
        .unwrap_or_else(|| entity.partition_key.clone())
}

fn require_datetime(
    entity: &TableEntity,
    field: &str,
) -> Result<chrono::DateTime<chrono::Utc>, StorageError> {
    entity.get_datetime(field).ok_or_else(|| {
        StorageError::Codec(format!(
            "entity {}/{} is missing {}",
            entity.partition_key, entity.row_key, field
        ))
    })
}

impl TableRecord for CallRecord {
    const ROW_KEY: &'static str = CALL_ROW_KEY;

    fn call_sid(&self) -> &str {
        &self.call_sid
    }

    fn encode(&self) -> TableEntity {
        TableEntity::new(partition_key(&self.call_sid), Self::ROW_KEY)
            .with("CallSid", self.call_sid.as_str())
            .with("From", self.from.as_str())
            .with("To", self.to.as_str())
            .with("Direction", self.direction.as_str())
            .with("Status", self.status.as_str())
            .with("StartedAt", self.started_at)
            .with_opt("CompletedAt", self.completed_at)
            .with_opt("DurationSeconds", self.duration_seconds)
            .with_opt("AccountSid", self.account_sid.clone())
            .with("StreamSids", encode_list(&self.stream_sids))
    }

    fn decode(entity: &TableEntity) -> Result<Self, StorageError> {
        let status = entity.get_str("Status").unwrap_or_default();
        let status = status.parse::<CallStatus>().unwrap_or_else(|_| {
            warn!(partition_key = %entity.partition_key, "Unknown stored status {:?}", status);
            CallStatus::Failed
        });

        let direction = entity
            .get_str("Direction")
            .and_then(|direction| direction.parse::<CallDirection>().ok())
            .unwrap_or(CallDirection::Inbound);

        Ok(CallRecord {
            call_sid: stored_call_sid(entity),
            from: entity.get_str("From").unwrap_or_default().to_string(),
            to: entity.get_str("To").unwrap_or_default().to_string(),
            direction,
            status,
            started_at: require_datetime(entity, "StartedAt")?,
            completed_at: entity.get_datetime("CompletedAt"),
            duration_seconds: entity.get_i64("DurationSeconds"),
            account_sid: entity.get_str("AccountSid").map(str::to_string),
            stream_sids: decode_list(entity, "StreamSids"),
        })
    }
}

impl TableRecord for TranscriptSummary {
    const ROW_KEY: &'static str = SUMMARY_ROW_KEY;

    fn call_sid(&self) -> &str {
        &self.call_sid
    }

    fn encode(&self) -> TableEntity {
        TableEntity::new(partition_key(&self.call_sid), Self::ROW_KEY)
            .with("CallSid", self.call_sid.as_str())
            .with("Summary", self.summary.as_str())
            .with("KeyFindings", encode_list(&self.key_findings))
            .with("GeneratedAtUtc", self.generated_at_utc)
    }

    fn decode(entity: &TableEntity) -> Result<Self, StorageError> {
        Ok(TranscriptSummary {
            call_sid: stored_call_sid(entity),
            summary: entity.get_str("Summary").unwrap_or_default().to_string(),
            key_findings: decode_list(entity, "KeyFindings"),
            generated_at_utc: require_datetime(entity, "GeneratedAtUtc")?,
        })
    }
}

impl TableRecord for LocationExtractionResult {
    const ROW_KEY: &'static str = LOCATION_ROW_KEY;

    fn call_sid(&self) -> &str {
        &self.call_sid
    }

    fn encode(&self) -> TableEntity {
        TableEntity::new(partition_key(&self.call_sid), Self::ROW_KEY)
            .with("CallSid", self.call_sid.as_str())
            .with_opt("RawLocationText", self.raw_location_text.clone())
            .with_opt("Latitude", self.latitude)
            .with_opt("Longitude", self.longitude)
            .with_opt("FormattedAddress", self.formatted_address.clone())
            .with_opt("Confidence", self.confidence)
    }

    fn decode(entity: &TableEntity) -> Result<Self, StorageError> {
        let (latitude, longitude) = match (entity.get_f64("Latitude"), entity.get_f64("Longitude")) {
            (Some(lat), Some(lon)) => (Some(lat), Some(lon)),
            (None, None) => (None, None),
            _ => {
                warn!(
                    partition_key = %entity.partition_key,
                    "Half-present coordinates, reading as absent"
                );
                (None, None)
            }
        };

        let confidence = entity
            .get_f64("Confidence")
            .filter(|c| (0.0..=1.0).contains(c));

        Ok(LocationExtractionResult {
            call_sid: stored_call_sid(entity),
            raw_location_text: entity.get_str("RawLocationText").map(str::to_string),
            latitude,
            longitude,
            formatted_address: entity.get_str("FormattedAddress").map(str::to_string),
            confidence,
        })
    }
}

//! Location extraction result

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use serde::{Deserialize, Serialize};

/// Location mentioned during a call, at most one per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationExtractionResult {
    pub call_sid: String,
    pub raw_location_text: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub formatted_address: Option<String>,
    pub confidence: Option<f64>,
}

impl LocationExtractionResult {
    pub fn from_text(call_sid: impl Into<String>, raw_location_text: impl Into<String>) -> Self {
        Self {
            call_sid: call_sid.into(),
            raw_location_text: Some(raw_location_text.into()),
            latitude: None,
            longitude: None,
            formatted_address: None,
            confidence: None,
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Coordinates come in pairs and confidence stays within 0..1
    pub fn validate(&self) -> Result<()> {
        if self.latitude.is_some() != self.longitude.is_some() {
            return Err(DomainError::ArgumentInvalid(
                "latitude and longitude must both be present or both absent".to_string(),
            ));
        }

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

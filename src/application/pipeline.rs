//! Call pipeline
//!
//! Wires the registry, distributor and finalizer together and routes inbound
//! provider and speech-engine events to them.

use crate::application::distributor::{PublishReceipt, TranscriptDistributor};
use crate::application::finalizer::InsightFinalizer;
use crate::application::insight::{InsightGenerator, KeywordInsightGenerator};
use crate::application::registry::CallSessionRegistry;
use crate::config::Config;
use crate::domain::call::{CallLifecycleEvent, CallRepository, StreamEvent};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::transcript::{LocationRepository, SummaryRepository, TranscriptionSegment};
use crate::infrastructure::persistence::{
    StorageGateway, TableCallRepository, TableLocationRepository, TableSummaryRepository,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One inbound event, tagged by its source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    Call(CallLifecycleEvent),
    Stream(StreamEvent),
    Transcription(TranscriptionSegment),
}

impl InboundEvent {
    /// Parse one newline-delimited JSON record
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| DomainError::ArgumentInvalid(format!("malformed inbound event: {}", e)))
    }
}

/// Result of routing one inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied,
    Published(PublishReceipt),
    /// Benign signal, logged and dropped
    Ignored(DomainError),
}

pub struct CallPipeline {
    registry: Arc<CallSessionRegistry>,
    distributor: TranscriptDistributor,
    sweep_interval: Duration,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl CallPipeline {
    pub fn new(
        config: &Config,
        calls: Arc<dyn CallRepository>,
        summaries: Arc<dyn SummaryRepository>,
        locations: Arc<dyn LocationRepository>,
        generator: Arc<dyn InsightGenerator>,
    ) -> Self {
        let finalizer = Arc::new(InsightFinalizer::new(
            &config.finalizer,
            calls,
            summaries,
            locations,
            generator,
        ));
        let registry = Arc::new(CallSessionRegistry::new(
            &config.registry,
            &config.distributor,
            finalizer,
        ));

        Self {
            distributor: TranscriptDistributor::new(Arc::clone(&registry)),
            registry,
            sweep_interval: config.registry.sweep_interval(),
            maintenance: Mutex::new(None),
        }
    }

    /// Build over table repositories and the keyword insight generator
    pub fn with_gateway(config: &Config, gateway: Arc<StorageGateway>) -> Self {
        let storage = &config.storage;
        Self::new(
            config,
            Arc::new(TableCallRepository::new(gateway.clone(), &storage.call_table)),
            Arc::new(TableSummaryRepository::new(gateway.clone(), &storage.summary_table)),
            Arc::new(TableLocationRepository::new(gateway, &storage.location_table)),
            Arc::new(KeywordInsightGenerator::from_config(&config.finalizer)),
        )
    }

    pub fn registry(&self) -> &Arc<CallSessionRegistry> {
        &self.registry
    }

    pub fn distributor(&self) -> &TranscriptDistributor {
        &self.distributor
    }

    /// Route one event; benign signals come back as [`IngestOutcome::Ignored`]
    pub async fn ingest(&self, event: InboundEvent) -> Result<IngestOutcome> {
        let result = match event {
            InboundEvent::Call(event) => self.registry.open(event).await.map(|_| IngestOutcome::Applied),
            InboundEvent::Stream(event) => self
                .registry
                .bind_stream(event)
                .await
                .map(|()| IngestOutcome::Applied),
            InboundEvent::Transcription(segment) => self
                .distributor
                .publish(segment)
                .await
                .map(IngestOutcome::Published),
        };

        match result {
            Err(e) if e.is_benign() => {
                debug!("Ignoring benign event: {}", e);
                Ok(IngestOutcome::Ignored(e))
            }
            other => other,
        }
    }

    /// Parse and route one NDJSON line
    pub async fn ingest_line(&self, line: &str) -> Result<IngestOutcome> {
        let event = InboundEvent::from_json(line)?;
        self.ingest(event).await
    }

    /// Start the periodic sweep of expired call slots
    pub async fn start_maintenance(&self) {
        let mut maintenance = self.maintenance.lock().await;
        if maintenance.is_some() {
            return;
        }

        let registry = Arc::downgrade(&self.registry);
        let period = self.sweep_interval;
        *maintenance = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let registry = match registry.upgrade() {
                    Some(registry) => registry,
                    None => break,
                };
                let evicted = registry.sweep().await;
                if evicted > 0 {
                    debug!("Swept {} expired call slot(s)", evicted);
                }
            }
        }));
        info!("Maintenance task started (sweep every {:?})", period);
    }

    /// Stop maintenance, reject new events and drain finalizations
    pub async fn shutdown(&self) {
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Maintenance task ended abnormally: {}", e);
                }
            }
        }

        self.registry.shutdown().await;
        info!(
            "Call pipeline stopped ({} call(s) still held)",
            self.registry.active_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::CallStatus;

    #[test]
    fn test_parse_inbound_events() {
        let call = InboundEvent::from_json(
            r#"{"event":"call","CallSid":"CA1","From":"+1","To":"+2","Status":"no-answer","Direction":"outbound-api"}"#,
        )
        .unwrap();
        match call {
            InboundEvent::Call(event) => assert_eq!(event.status, CallStatus::Failed),
            other => panic!("unexpected event: {:?}", other),
        }

        let segment = InboundEvent::from_json(
            r#"{"event":"transcription","CallSid":"CA1","StreamSid":"MZ1","Text":"hi","IsFinal":true,"Sequence":3}"#,
        )
        .unwrap();
        match segment {
            InboundEvent::Transcription(segment) => {
                assert!(segment.is_final);
                assert_eq!(segment.sequence, Some(3));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_line_is_argument_invalid() {
        assert!(matches!(
            InboundEvent::from_json("{not json"),
            Err(DomainError::ArgumentInvalid(_))
        ));
        assert!(matches!(
            InboundEvent::from_json(r#"{"event":"call","CallSid":"  ","Status":"queued"}"#),
            Err(DomainError::ArgumentInvalid(_))
        ));
    }
}

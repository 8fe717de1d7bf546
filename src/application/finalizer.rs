//! Insight finalizer
//!
//! Runs once per closed call: derives (or accepts precomputed) insights from
//! the accumulated transcript and persists the call record, summary and
//! location. Persistence happens on spawned tasks, outside any per-call lock,
//! and in-flight work is drained on shutdown.

use crate::application::insight::{InsightGenerator, Insights};
use crate::config::FinalizerConfig;
use crate::domain::call::{CallRecord, CallRepository};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CallSid;
use crate::domain::transcript::{LocationRepository, SummaryRepository};
use crate::infrastructure::persistence::RetryPolicy;
use crate::infrastructure::telemetry::{FINALIZATIONS_FAILED_TOTAL, FINALIZATIONS_PERSISTED_TOTAL};
use futures::future::BoxFuture;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Final segment text accumulated for one call, in arrival order
#[derive(Debug, Clone, Default)]
pub struct TranscriptBuffer {
    lines: Vec<String>,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Hand the accumulated lines over, leaving the buffer empty
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

/// Everything needed to finalize one call
#[derive(Debug, Clone)]
pub struct FinalizationJob {
    pub call_sid: CallSid,
    pub record: CallRecord,
    pub transcript: Vec<String>,
    /// Insights attached before close; generated from the transcript when absent
    pub insights: Option<Insights>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizationOutcome {
    Persisted,
    Failed(DomainError),
}

/// Invoked once with the outcome of a job
pub type OutcomeHook = Box<dyn FnOnce(FinalizationOutcome) -> BoxFuture<'static, ()> + Send>;

pub struct InsightFinalizer {
    calls: Arc<dyn CallRepository>,
    summaries: Arc<dyn SummaryRepository>,
    locations: Arc<dyn LocationRepository>,
    generator: Arc<dyn InsightGenerator>,
    retry: RetryPolicy,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl InsightFinalizer {
    pub fn new(
        config: &FinalizerConfig,
        calls: Arc<dyn CallRepository>,
        summaries: Arc<dyn SummaryRepository>,
        locations: Arc<dyn LocationRepository>,
        generator: Arc<dyn InsightGenerator>,
    ) -> Self {
        Self {
            calls,
            summaries,
            locations,
            generator,
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.base_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Start finalizing `job` in the background
    ///
    /// Returns once the job is accepted; `on_outcome` runs when it settles.
    pub async fn submit(self: &Arc<Self>, job: FinalizationJob, on_outcome: OutcomeHook) {
        let finalizer = Arc::clone(self);
        let call_sid = job.call_sid.clone();

        let handle = tokio::spawn(async move {
            let outcome = match finalizer.finalize(job).await {
                Ok(()) => {
                    counter!(FINALIZATIONS_PERSISTED_TOTAL).increment(1);
                    FinalizationOutcome::Persisted
                }
                Err(e) => {
                    counter!(FINALIZATIONS_FAILED_TOTAL).increment(1);
                    error!(call_sid = %call_sid, "Finalization failed: {}", e);
                    FinalizationOutcome::Failed(e)
                }
            };
            on_outcome(outcome).await;
        });

        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Wait for every submitted job to settle
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *self.in_flight.lock().await);
        if handles.is_empty() {
            return;
        }

        info!("Draining {} in-flight finalization(s)", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Finalization task aborted: {}", e);
            }
        }
    }

    pub async fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Derive insights if needed and persist everything for one call
    pub async fn finalize(&self, job: FinalizationJob) -> Result<()> {
        let FinalizationJob {
            call_sid,
            record,
            transcript,
            insights,
        } = job;

        let insights = match insights {
            Some(insights) => insights,
            None => self.generator.generate(&call_sid, &transcript),
        };
        debug!(
            call_sid = %call_sid,
            segments = transcript.len(),
            has_location = insights.location.is_some(),
            "Persisting finalized call"
        );

        self.persist("call record", &call_sid, || self.calls.upsert(&record))
            .await?;
        self.persist("summary", &call_sid, || {
            self.summaries.upsert(&insights.summary)
        })
        .await?;
        if let Some(location) = &insights.location {
            self.persist("location", &call_sid, || self.locations.upsert(location))
                .await?;
        }

        info!(call_sid = %call_sid, status = %record.status, "Call finalized");
        Ok(())
    }

    async fn persist<F, Fut>(&self, what: &str, call_sid: &CallSid, mut write: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 1;
        loop {
            match write().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts() => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        call_sid = %call_sid,
                        "Persisting {} failed (attempt {}): {}, retrying in {:?}",
                        what, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::insight::KeywordInsightGenerator;
    use crate::config::Config;
    use crate::domain::call::repository::MockCallRepository;
    use crate::domain::call::{CallDirection, CallStatus};
    use crate::domain::transcript::repository::{MockLocationRepository, MockSummaryRepository};
    use crate::domain::transcript::TranscriptSummary;
    use chrono::Utc;
    use tokio::sync::oneshot;

    fn fast_config() -> FinalizerConfig {
        let mut config = Config::default().finalizer;
        config.max_attempts = 3;
        config.base_delay_ms = 1;
        config.max_delay_ms = 2;
        config
    }

    fn job(transcript: &[&str]) -> FinalizationJob {
        let now = Utc::now();
        FinalizationJob {
            call_sid: CallSid::parse("CA123").unwrap(),
            record: CallRecord {
                call_sid: "CA123".to_string(),
                from: "+15550001".to_string(),
                to: "+15550002".to_string(),
                direction: CallDirection::Inbound,
                status: CallStatus::Completed,
                started_at: now,
                completed_at: Some(now),
                duration_seconds: Some(0),
                account_sid: None,
                stream_sids: vec![],
            },
            transcript: transcript.iter().map(|s| s.to_string()).collect(),
            insights: None,
        }
    }

    fn finalizer(
        calls: MockCallRepository,
        summaries: MockSummaryRepository,
        locations: MockLocationRepository,
    ) -> InsightFinalizer {
        let config = fast_config();
        InsightFinalizer::new(
            &config,
            Arc::new(calls),
            Arc::new(summaries),
            Arc::new(locations),
            Arc::new(KeywordInsightGenerator::from_config(&config)),
        )
    }

    #[test]
    fn test_transcript_buffer_take() {
        let mut buffer = TranscriptBuffer::new();
        buffer.push("Hello");
        buffer.push("Bye");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.take(), vec!["Hello", "Bye"]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_persists_record_and_generated_summary() {
        let mut calls = MockCallRepository::new();
        calls
            .expect_upsert()
            .times(1)
            .withf(|record| record.status == CallStatus::Completed)
            .returning(|_| Ok(()));
        let mut summaries = MockSummaryRepository::new();
        summaries
            .expect_upsert()
            .times(1)
            .withf(|summary| summary.summary == "Hello, how can I help")
            .returning(|_| Ok(()));
        let mut locations = MockLocationRepository::new();
        locations.expect_upsert().never();

        let finalizer = finalizer(calls, summaries, locations);
        tokio_test::assert_ok!(finalizer.finalize(job(&["Hello, how can I help"])).await);
    }

    #[tokio::test]
    async fn test_precomputed_insights_skip_generation() {
        let mut calls = MockCallRepository::new();
        calls.expect_upsert().times(1).returning(|_| Ok(()));
        let mut summaries = MockSummaryRepository::new();
        summaries
            .expect_upsert()
            .times(1)
            .withf(|summary| summary.summary == "operator notes")
            .returning(|_| Ok(()));
        let locations = MockLocationRepository::new();

        let mut job = job(&["ignored"]);
        job.insights = Some(Insights {
            summary: TranscriptSummary::new("CA123", "operator notes", vec![]),
            location: None,
        });

        let finalizer = finalizer(calls, summaries, locations);
        tokio_test::assert_ok!(finalizer.finalize(job).await);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut calls = MockCallRepository::new();
        let mut seq = mockall::Sequence::new();
        calls
            .expect_upsert()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DomainError::StorageTransient("throttled".into())));
        calls
            .expect_upsert()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let mut summaries = MockSummaryRepository::new();
        summaries.expect_upsert().times(1).returning(|_| Ok(()));
        let locations = MockLocationRepository::new();

        let finalizer = finalizer(calls, summaries, locations);
        tokio_test::assert_ok!(finalizer.finalize(job(&[])).await);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_failure_through_hook() {
        let mut calls = MockCallRepository::new();
        calls
            .expect_upsert()
            .times(3)
            .returning(|_| Err(DomainError::StorageTransient("unavailable".into())));
        let mut summaries = MockSummaryRepository::new();
        summaries.expect_upsert().never();
        let locations = MockLocationRepository::new();

        let finalizer = Arc::new(finalizer(calls, summaries, locations));
        let (tx, rx) = oneshot::channel();
        finalizer
            .submit(
                job(&["Hello"]),
                Box::new(move |outcome| {
                    Box::pin(async move {
                        let _ = tx.send(outcome);
                    })
                }),
            )
            .await;
        finalizer.drain().await;

        assert!(matches!(
            rx.await.unwrap(),
            FinalizationOutcome::Failed(DomainError::StorageTransient(_))
        ));
        assert_eq!(finalizer.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut calls = MockCallRepository::new();
        calls
            .expect_upsert()
            .times(1)
            .returning(|_| Err(DomainError::Storage("bad request".into())));
        let summaries = MockSummaryRepository::new();
        let locations = MockLocationRepository::new();

        let finalizer = finalizer(calls, summaries, locations);
        let result = finalizer.finalize(job(&[])).await;
        assert!(matches!(result, Err(DomainError::Storage(_))));
    }
}

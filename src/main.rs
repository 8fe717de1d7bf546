use callscribe::application::{CallPipeline, IngestOutcome, KeywordInsightGenerator};
use callscribe::config::Config;
use callscribe::domain::call::{
    CallDirection, CallLifecycleEvent, CallRepository, CallStatus, FinalizationState, StreamEvent,
};
use callscribe::domain::shared::value_objects::{CallSid, StreamSid};
use callscribe::domain::transcript::{SummaryRepository, TranscriptionSegment};
use callscribe::infrastructure::persistence::{
    StorageGateway, TableCallRepository, TableLocationRepository, TableSummaryRepository,
};
use callscribe::infrastructure::telemetry::describe_metrics;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting callscribe");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config);
    describe_metrics();

    // Storage and repositories
    let gateway = Arc::new(StorageGateway::connect(&config.storage)?);
    let calls = Arc::new(TableCallRepository::new(
        gateway.clone(),
        &config.storage.call_table,
    ));
    let summaries = Arc::new(TableSummaryRepository::new(
        gateway.clone(),
        &config.storage.summary_table,
    ));
    let locations = Arc::new(TableLocationRepository::new(
        gateway,
        &config.storage.location_table,
    ));

    let pipeline = CallPipeline::new(
        &config,
        calls.clone(),
        summaries.clone(),
        locations,
        Arc::new(KeywordInsightGenerator::from_config(&config.finalizer)),
    );
    pipeline.start_maintenance().await;

    // Demo: run a sample call through the pipeline
    demo_call_lifecycle(&pipeline, &*calls, &*summaries).await?;

    info!("Reading newline-delimited JSON events from stdin (Ctrl-C to stop)");
    ingest_stdin(&pipeline).await?;

    pipeline.shutdown().await;
    info!("callscribe stopped");
    Ok(())
}

async fn ingest_stdin(pipeline: &CallPipeline) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => {
                        info!("stdin closed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match pipeline.ingest_line(&line).await {
                    Ok(IngestOutcome::Ignored(reason)) => info!("Ignored: {}", reason),
                    Ok(_) => {}
                    Err(e) => warn!("Rejected event: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn demo_call_lifecycle(
    pipeline: &CallPipeline,
    calls: &dyn CallRepository,
    summaries: &dyn SummaryRepository,
) -> anyhow::Result<()> {
    info!("=== Call Lifecycle Demo ===");

    let call_sid = CallSid::parse("CA123")?;
    let stream_sid = StreamSid::parse("MZ123")?;
    let registry = pipeline.registry();
    let started_at = chrono::Utc::now();

    registry
        .open(
            CallLifecycleEvent::new(call_sid.clone(), CallStatus::Queued)
                .with_parties("+15550100", "+15550199")
                .with_direction(CallDirection::Inbound)
                .at(started_at),
        )
        .await?;
    info!("Call queued");

    // Watch the live transcript
    let subscription = registry.subscribe(&call_sid).await?;
    let watcher = tokio::spawn(async move {
        subscription
            .for_each(|item| async move {
                info!(
                    "[{}] #{} {}{}",
                    item.segment.call_sid,
                    item.sequence,
                    item.segment.text,
                    if item.segment.is_final { " (final)" } else { "" }
                );
            })
            .await;
    });

    registry
        .open(CallLifecycleEvent::new(call_sid.clone(), CallStatus::InProgress))
        .await?;
    registry
        .bind_stream(StreamEvent::started(call_sid.clone(), stream_sid.clone()))
        .await?;
    info!("Call answered, stream {} started", stream_sid);

    let distributor = pipeline.distributor();
    distributor
        .publish(TranscriptionSegment::interim(call_sid.clone(), stream_sid.clone(), "Hello"))
        .await?;
    distributor
        .publish(
            TranscriptionSegment::final_text(
                call_sid.clone(),
                stream_sid.clone(),
                "Hello, how can I help",
            )
            .with_confidence(0.92),
        )
        .await?;

    registry
        .bind_stream(StreamEvent::stopped(call_sid.clone(), stream_sid))
        .await?;
    let session = registry
        .open(
            CallLifecycleEvent::new(call_sid.clone(), CallStatus::Completed)
                .at(started_at + chrono::Duration::seconds(30)),
        )
        .await?;
    info!(
        "Call {}: {:?} after {:?}s",
        call_sid,
        session.status(),
        session.duration_seconds()
    );
    watcher.await?;

    // Finalization runs in the background; wait briefly for it to settle
    for _ in 0..50 {
        match registry.get(&call_sid).await {
            Some(session) if session.finalization() == FinalizationState::Pending => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            _ => break,
        }
    }

    if let Some(record) = calls.get_by_call_sid(call_sid.as_str()).await? {
        info!(
            "Persisted call record: status={}, duration={:?}s",
            record.status, record.duration_seconds
        );
    }
    if let Some(summary) = summaries.get_by_call_sid(call_sid.as_str()).await? {
        info!(
            "Persisted summary: \"{}\" ({} key finding(s))",
            summary.summary,
            summary.key_findings.len()
        );
    }

    info!("=== Call Lifecycle Demo Complete ===");
    Ok(())
}

//! Fan-out ordering, backpressure and reconnect tests

use callscribe::application::{CallPipeline, KeywordInsightGenerator};
use callscribe::config::Config;
use callscribe::domain::call::{CallLifecycleEvent, CallStatus};
use callscribe::domain::shared::value_objects::{CallSid, StreamSid};
use callscribe::domain::transcript::TranscriptionSegment;
use callscribe::infrastructure::persistence::{
    InMemoryEntityStore, StorageGateway, TableCallRepository, TableLocationRepository,
    TableSummaryRepository,
};
use callscribe::DomainError;
use futures::StreamExt;
use tokio::sync::mpsc::error::TryRecvError;
use std::sync::Arc;

fn pipeline(config: Config) -> CallPipeline {
    let gateway = Arc::new(
        StorageGateway::new(Arc::new(InMemoryEntityStore::new()), &config.storage).unwrap(),
    );
    CallPipeline::new(
        &config,
        Arc::new(TableCallRepository::new(gateway.clone(), "calls")),
        Arc::new(TableSummaryRepository::new(gateway.clone(), "summaries")),
        Arc::new(TableLocationRepository::new(gateway, "locations")),
        Arc::new(KeywordInsightGenerator::from_config(&config.finalizer)),
    )
}

async fn open_call(pipeline: &CallPipeline, call: &str) -> CallSid {
    let call_sid = CallSid::parse(call).unwrap();
    pipeline
        .registry()
        .open(CallLifecycleEvent::new(call_sid.clone(), CallStatus::InProgress))
        .await
        .unwrap();
    call_sid
}

fn segment(call: &CallSid, text: String) -> TranscriptionSegment {
    TranscriptionSegment::interim(call.clone(), StreamSid::parse("MZ1").unwrap(), text)
}

#[tokio::test]
async fn test_subscribers_observe_publish_order() {
    let pipeline = pipeline(Config::default());
    let call = open_call(&pipeline, "CA1").await;

    let early = pipeline.registry().subscribe(&call).await.unwrap();
    for n in 0..10 {
        pipeline
            .distributor()
            .publish(segment(&call, format!("segment {}", n)))
            .await
            .unwrap();
    }
    let late = pipeline.registry().subscribe(&call).await.unwrap();
    for n in 10..20 {
        pipeline
            .distributor()
            .publish(segment(&call, format!("segment {}", n)))
            .await
            .unwrap();
    }
    pipeline
        .registry()
        .close(&call, CallStatus::Completed)
        .await
        .unwrap();

    let early: Vec<u64> = early.map(|item| item.sequence).collect().await;
    let late: Vec<u64> = late.map(|item| item.sequence).collect().await;
    assert_eq!(early, (1..=20).collect::<Vec<_>>());
    assert_eq!(late, (11..=20).collect::<Vec<_>>());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_publishers_keep_a_single_order() {
    let pipeline = Arc::new(pipeline(Config::default()));
    let call = open_call(&pipeline, "CA2").await;
    let mut subscription = pipeline.registry().subscribe(&call).await.unwrap();

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let pipeline = Arc::clone(&pipeline);
        let call = call.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..10 {
                pipeline
                    .distributor()
                    .publish(segment(&call, format!("{}-{}", worker, n)))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut expected = 1;
    while let Ok(item) = subscription.try_recv() {
        assert_eq!(item.sequence, expected);
        expected += 1;
    }
    assert_eq!(expected, 41);
    assert!(matches!(subscription.try_recv(), Err(TryRecvError::Empty)));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_slow_subscriber_is_disconnected() {
    let mut config = Config::default();
    config.distributor.subscriber_queue_bound = 4;
    config.distributor.replay_window = 4;
    let pipeline = pipeline(config);
    let call = open_call(&pipeline, "CA3").await;

    let mut fast = pipeline.registry().subscribe(&call).await.unwrap();
    let mut slow = pipeline.registry().subscribe(&call).await.unwrap();
    let mut dropped = pipeline.registry().subscribe(&call).await.unwrap();

    let mut received = Vec::new();
    let mut disconnected = 0;
    for n in 0..10 {
        let receipt = pipeline
            .distributor()
            .publish(segment(&call, format!("{}", n)))
            .await
            .unwrap();
        disconnected += receipt.disconnected;
        received.push(fast.recv().await.unwrap().sequence);
    }

    assert_eq!(disconnected, 2);
    assert_eq!(received, (1..=10).collect::<Vec<_>>());

    // The slow subscriber keeps what was queued, then its stream ends
    let mut backlog = Vec::new();
    while let Some(item) = slow.recv().await {
        backlog.push(item.sequence);
    }
    assert_eq!(backlog, vec![1, 2, 3, 4]);

    // Polling callers see the cut-off as a disconnect, not an empty queue
    for expected in 1..=4 {
        assert_eq!(dropped.try_recv().unwrap().sequence, expected);
    }
    assert!(matches!(dropped.try_recv(), Err(TryRecvError::Disconnected)));
    assert!(matches!(fast.try_recv(), Err(TryRecvError::Empty)));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_resubscribe_replays_after_last_seen() {
    let pipeline = pipeline(Config::default());
    let call = open_call(&pipeline, "CA4").await;

    let first = pipeline.registry().subscribe(&call).await.unwrap();
    for n in 0..6 {
        pipeline
            .distributor()
            .publish(segment(&call, format!("{}", n)))
            .await
            .unwrap();
    }
    assert!(pipeline.registry().unsubscribe(&first.handle()).await);

    let mut resumed = pipeline.registry().resubscribe(&call, 4).await.unwrap();
    assert_eq!(resumed.recv().await.unwrap().sequence, 5);
    assert_eq!(resumed.recv().await.unwrap().sequence, 6);

    pipeline
        .distributor()
        .publish(segment(&call, "live".to_string()))
        .await
        .unwrap();
    let live = resumed.recv().await.unwrap();
    assert_eq!((live.sequence, live.segment.text.as_str()), (7, "live"));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_to_absent_call_times_out() {
    let mut config = Config::default();
    config.registry.subscribe_timeout_ms = 30;
    let pipeline = pipeline(config);

    let started = std::time::Instant::now();
    let result = pipeline
        .registry()
        .subscribe(&CallSid::parse("CA999").unwrap())
        .await;

    assert!(matches!(result, Err(DomainError::CallNotFound(_))));
    assert!(started.elapsed() >= std::time::Duration::from_millis(30));
}

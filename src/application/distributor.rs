//! Transcript distributor
//!
//! Ordered, at-least-once fan-out of transcription segments to the
//! subscribers of a call. Every segment is stamped with a per-call delivery
//! sequence and pushed to each subscriber queue with a non-blocking send
//! while the call's lock is held, so delivery order is publish order and a
//! slow subscriber never holds up the publisher.

use crate::application::finalizer::TranscriptBuffer;
use crate::application::registry::{CallSessionRegistry, SlotPhase};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{StreamSid, SubscriptionId};
use crate::domain::transcript::{SequencedSegment, TranscriptionSegment};
use crate::infrastructure::telemetry::{
    SEGMENTS_DUPLICATE_TOTAL, SEGMENTS_PUBLISHED_TOTAL, SUBSCRIBERS_DISCONNECTED_TOTAL,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// What happened to a published segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stamped and pushed to every live subscriber
    Delivered,
    /// Redelivery of a segment already seen on its stream
    Duplicate,
    /// Arrived after the call closed; acknowledged, not delivered
    Trailing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub outcome: PublishOutcome,
    /// Delivery sequence assigned to the segment, if it was delivered
    pub sequence: Option<u64>,
    pub delivered_to: usize,
    pub disconnected: usize,
}

impl PublishReceipt {
    fn acknowledged(outcome: PublishOutcome) -> Self {
        Self {
            outcome,
            sequence: None,
            delivered_to: 0,
            disconnected: 0,
        }
    }
}

/// Per-call live transcript state: subscriber queues, replay ring and the
/// final-segment buffer handed to the finalizer
#[derive(Debug)]
pub struct TranscriptChannel {
    subscribers: HashMap<SubscriptionId, mpsc::Sender<SequencedSegment>>,
    ring: VecDeque<SequencedSegment>,
    replay_window: usize,
    queue_bound: usize,
    next_sequence: u64,
    /// Highest source sequence seen per stream
    source_sequences: HashMap<StreamSid, u64>,
    last_timestamp: Option<DateTime<Utc>>,
    transcript: TranscriptBuffer,
}

impl TranscriptChannel {
    pub fn new(replay_window: usize, queue_bound: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            ring: VecDeque::with_capacity(replay_window),
            replay_window,
            queue_bound: queue_bound.max(1),
            next_sequence: 1,
            source_sequences: HashMap::new(),
            last_timestamp: None,
            transcript: TranscriptBuffer::new(),
        }
    }

    /// Register a subscriber, replaying retained segments after `after`
    pub fn attach(
        &mut self,
        id: SubscriptionId,
        after: Option<u64>,
    ) -> mpsc::Receiver<SequencedSegment> {
        let (tx, rx) = mpsc::channel(self.queue_bound);

        if let Some(last_seen) = after {
            if let Some(oldest) = self.ring.front() {
                if oldest.sequence > last_seen.saturating_add(1) {
                    warn!(
                        subscription = %id,
                        "Replay window starts at {}, segments after {} were already discarded",
                        oldest.sequence, last_seen
                    );
                }
            }

            for item in self.ring.iter().filter(|item| item.sequence > last_seen) {
                if tx.try_send(item.clone()).is_err() {
                    warn!(subscription = %id, "Replay exceeded queue bound, truncating");
                    break;
                }
            }
        }

        self.subscribers.insert(id, tx);
        rx
    }

    /// Remove a subscriber; its stream ends once drained
    pub fn detach(&mut self, id: &SubscriptionId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Sequence of the most recently delivered segment, 0 before the first
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn transcript(&self) -> &TranscriptBuffer {
        &self.transcript
    }

    /// Stamp, retain and fan out one segment
    pub fn publish(
        &mut self,
        segment: TranscriptionSegment,
        active_stream: Option<&StreamSid>,
    ) -> PublishReceipt {
        if let Some(source_sequence) = segment.sequence {
            let last = self.source_sequences.get(&segment.stream_sid).copied();
            if last.map_or(false, |last| source_sequence <= last) {
                debug!(
                    call_sid = %segment.call_sid,
                    stream_sid = %segment.stream_sid,
                    source_sequence,
                    "Dropping redelivered segment"
                );
                counter!(SEGMENTS_DUPLICATE_TOTAL).increment(1);
                return PublishReceipt::acknowledged(PublishOutcome::Duplicate);
            }
            self.source_sequences
                .insert(segment.stream_sid.clone(), source_sequence);
        }

        if let Some(last) = self.last_timestamp {
            if segment.timestamp_utc < last {
                warn!(
                    call_sid = %segment.call_sid,
                    "Segment timestamp {} precedes previous {}, delivering in arrival order",
                    segment.timestamp_utc, last
                );
            }
        }
        self.last_timestamp = Some(
            self.last_timestamp
                .map_or(segment.timestamp_utc, |last| last.max(segment.timestamp_utc)),
        );

        match active_stream {
            Some(active) if active != &segment.stream_sid => warn!(
                call_sid = %segment.call_sid,
                "Segment from stream {} while {} is active",
                segment.stream_sid, active
            ),
            None => debug!(
                call_sid = %segment.call_sid,
                stream_sid = %segment.stream_sid,
                "Segment arrived with no active stream"
            ),
            _ => {}
        }

        if segment.is_final {
            self.transcript.push(segment.text.clone());
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let item = SequencedSegment { sequence, segment };

        if self.replay_window > 0 {
            if self.ring.len() == self.replay_window {
                self.ring.pop_front();
            }
            self.ring.push_back(item.clone());
        }

        let (delivered_to, disconnected) = self.fan_out(&item);
        counter!(SEGMENTS_PUBLISHED_TOTAL).increment(1);

        PublishReceipt {
            outcome: PublishOutcome::Delivered,
            sequence: Some(sequence),
            delivered_to,
            disconnected,
        }
    }

    fn fan_out(&mut self, item: &SequencedSegment) -> (usize, usize) {
        let mut delivered = 0;
        let mut overflowed = Vec::new();
        let mut gone = Vec::new();

        for (id, tx) in &self.subscribers {
            match tx.try_send(item.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => overflowed.push(*id),
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        for id in &overflowed {
            self.subscribers.remove(id);
            warn!(
                call_sid = %item.segment.call_sid,
                subscription = %id,
                "Subscriber queue full at sequence {}, disconnecting",
                item.sequence
            );
        }
        for id in &gone {
            self.subscribers.remove(id);
            debug!(subscription = %id, "Subscriber dropped its receiver");
        }

        if !overflowed.is_empty() {
            counter!(SUBSCRIBERS_DISCONNECTED_TOTAL).increment(overflowed.len() as u64);
        }
        (delivered, overflowed.len())
    }

    /// End every subscriber stream and discard the replay ring, returning the
    /// accumulated final transcript
    pub fn close(&mut self) -> Vec<String> {
        self.subscribers.clear();
        self.ring.clear();
        self.source_sequences.clear();
        self.transcript.take()
    }
}

/// Publishes transcription segments into the registry's per-call channels
#[derive(Clone)]
pub struct TranscriptDistributor {
    registry: Arc<CallSessionRegistry>,
}

impl TranscriptDistributor {
    pub fn new(registry: Arc<CallSessionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `segment` to every subscriber of its call
    ///
    /// Segments for a call that closed within the grace period are
    /// acknowledged as [`PublishOutcome::Trailing`] and not delivered.
    pub async fn publish(&self, segment: TranscriptionSegment) -> Result<PublishReceipt> {
        self.registry.ensure_accepting()?;
        segment.validate()?;

        let unknown = || {
            DomainError::UnknownCall(format!(
                "no active or recently closed session for call {}",
                segment.call_sid
            ))
        };

        let slot = self.registry.slot(&segment.call_sid).await.ok_or_else(unknown)?;
        let mut guard = slot.state.lock().await;
        let state = &mut *guard;
        if state.evicted {
            return Err(unknown());
        }

        match state.phase {
            SlotPhase::Pending { .. } => return Err(unknown()),
            SlotPhase::Finalizing => {
                return Ok(PublishReceipt::acknowledged(PublishOutcome::Trailing))
            }
            SlotPhase::Closed { closed_at } => {
                if closed_at.elapsed() > self.registry.closed_grace_period() {
                    return Err(unknown());
                }
                debug!(call_sid = %segment.call_sid, "Absorbing trailing segment after close");
                return Ok(PublishReceipt::acknowledged(PublishOutcome::Trailing));
            }
            SlotPhase::Active => {}
        }

        let active_stream = state
            .session
            .as_ref()
            .and_then(|session| session.active_stream())
            .map(|stream| stream.stream_sid().clone());

        Ok(state.channel.publish(segment, active_stream.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::CallSid;

    fn segment(text: &str) -> TranscriptionSegment {
        TranscriptionSegment::interim(
            CallSid::parse("CA1").unwrap(),
            StreamSid::parse("MZ1").unwrap(),
            text,
        )
    }

    #[test]
    fn test_sequences_start_at_one() {
        let mut channel = TranscriptChannel::new(8, 8);
        let mut rx = channel.attach(SubscriptionId::new(), None);

        let first = channel.publish(segment("a"), None);
        let second = channel.publish(segment("b"), None);
        assert_eq!(first.sequence, Some(1));
        assert_eq!(second.sequence, Some(2));
        assert_eq!(channel.last_sequence(), 2);

        assert_eq!(rx.try_recv().unwrap().segment.text, "a");
        assert_eq!(rx.try_recv().unwrap().segment.text, "b");
    }

    #[test]
    fn test_full_queue_disconnects_subscriber() {
        let mut channel = TranscriptChannel::new(4, 2);
        let _slow = channel.attach(SubscriptionId::new(), None);

        channel.publish(segment("1"), None);
        channel.publish(segment("2"), None);
        let receipt = channel.publish(segment("3"), None);

        assert_eq!(receipt.disconnected, 1);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn test_source_sequence_duplicates_dropped() {
        let mut channel = TranscriptChannel::new(8, 8);
        let mut rx = channel.attach(SubscriptionId::new(), None);

        channel.publish(segment("a").with_sequence(1), None);
        let again = channel.publish(segment("a").with_sequence(1), None);
        assert_eq!(again.outcome, PublishOutcome::Duplicate);
        assert_eq!(again.sequence, None);

        rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_replay_after_last_seen() {
        let mut channel = TranscriptChannel::new(3, 8);
        for text in ["a", "b", "c", "d"] {
            channel.publish(segment(text), None);
        }

        let mut rx = channel.attach(SubscriptionId::new(), Some(2));
        assert_eq!(rx.try_recv().unwrap().sequence, 3);
        assert_eq!(rx.try_recv().unwrap().sequence, 4);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_replay_with_largest_last_seen_sends_nothing() {
        let mut channel = TranscriptChannel::new(4, 8);
        channel.publish(segment("a"), None);

        let mut rx = channel.attach(SubscriptionId::new(), Some(u64::MAX));
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));

        channel.publish(segment("b"), None);
        assert_eq!(rx.try_recv().unwrap().sequence, 2);
    }

    #[test]
    fn test_close_returns_final_text_and_ends_streams() {
        let mut channel = TranscriptChannel::new(8, 8);
        let mut rx = channel.attach(SubscriptionId::new(), None);

        channel.publish(segment("Hello"), None);
        let final_segment = TranscriptionSegment {
            is_final: true,
            ..segment("Hello, how can I help")
        };
        channel.publish(final_segment, None);

        assert_eq!(channel.close(), vec!["Hello, how can I help"]);
        assert_eq!(channel.subscriber_count(), 0);

        assert_eq!(rx.try_recv().unwrap().sequence, 1);
        assert_eq!(rx.try_recv().unwrap().sequence, 2);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}

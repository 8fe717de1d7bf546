//! Call session registry
//!
//! In-memory authority for every live call. Calls live in a table of slots
//! keyed by CallSid; each slot has its own async mutex, and the table lock is
//! only held to look up, insert or evict a slot, never across per-call work.
//!
//! Slot phases:
//! - `Pending`: placeholder created by a subscriber waiting for the call
//! - `Active`: session open, segments flowing
//! - `Finalizing`: terminal status applied, hand-off to the finalizer in progress
//! - `Closed`: hand-off acknowledged, retained for the grace period
//!
//! Every call that reaches a terminal status is also remembered in a bounded
//! finished-call set that outlives slot eviction, so a redelivered or
//! reordered event can never reopen or re-finalize it.

use crate::application::distributor::TranscriptChannel;
use crate::application::finalizer::{
    FinalizationJob, FinalizationOutcome, InsightFinalizer, OutcomeHook,
};
use crate::application::insight::Insights;
use crate::config::{DistributorConfig, RegistryConfig};
use crate::domain::call::{
    CallLifecycleEvent, CallRecord, CallSession, CallStatus, FinalizationState, StatusChange,
    StreamEvent, StreamStatus,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallSid, SubscriptionId};
use crate::domain::transcript::SequencedSegment;
use crate::infrastructure::telemetry::{self, CALL_EVENTS_TOTAL, STALE_EVENTS_TOTAL};
use chrono::{DateTime, Utc};
use futures::Stream;
use metrics::counter;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotPhase {
    Pending { since: Instant },
    Active,
    Finalizing,
    Closed { closed_at: Instant },
}

pub(crate) struct SlotState {
    pub(crate) phase: SlotPhase,
    pub(crate) session: Option<CallSession>,
    pub(crate) channel: TranscriptChannel,
    pub(crate) insights: Option<Insights>,
    /// Set when the slot is removed from the table; holders must look up again
    pub(crate) evicted: bool,
}

pub(crate) struct CallSlot {
    pub(crate) state: Mutex<SlotState>,
    /// Flips to true when the slot leaves `Pending` (opened or evicted)
    ready: watch::Sender<bool>,
}

impl CallSlot {
    fn placeholder(replay_window: usize, queue_bound: usize) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            state: Mutex::new(SlotState {
                phase: SlotPhase::Pending {
                    since: Instant::now(),
                },
                session: None,
                channel: TranscriptChannel::new(replay_window, queue_bound),
                insights: None,
                evicted: false,
            }),
            ready,
        }
    }
}

/// Calls that reached a terminal status, oldest forgotten first
struct FinishedCalls {
    capacity: usize,
    statuses: HashMap<CallSid, CallStatus>,
    order: VecDeque<CallSid>,
}

impl FinishedCalls {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            statuses: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn record(&mut self, call_sid: &CallSid, status: CallStatus) {
        if self.statuses.insert(call_sid.clone(), status).is_some() {
            return;
        }
        self.order.push_back(call_sid.clone());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    fn status(&self, call_sid: &CallSid) -> Option<CallStatus> {
        self.statuses.get(call_sid).copied()
    }
}

/// Identifies one subscription for [`CallSessionRegistry::unsubscribe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    call_sid: CallSid,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn call_sid(&self) -> &CallSid {
        &self.call_sid
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// Live feed of one call's segments, in delivery order
///
/// Ends when the call closes, when the subscriber is unsubscribed, or when
/// it falls too far behind and is disconnected.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    receiver: mpsc::Receiver<SequencedSegment>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn call_sid(&self) -> &CallSid {
        &self.handle.call_sid
    }

    pub async fn recv(&mut self) -> Option<SequencedSegment> {
        self.receiver.recv().await
    }

    /// Next segment if one is already queued
    ///
    /// `Disconnected` means the feed is over: the call closed, the
    /// subscription was dropped, or it fell behind and was cut off.
    pub fn try_recv(&mut self) -> std::result::Result<SequencedSegment, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Stream for Subscription {
    type Item = SequencedSegment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

pub struct CallSessionRegistry {
    slots: RwLock<HashMap<CallSid, Arc<CallSlot>>>,
    /// Locked after a slot's state, never before
    finished: Mutex<FinishedCalls>,
    finalizer: Arc<InsightFinalizer>,
    subscribe_timeout: Duration,
    closed_grace_period: Duration,
    replay_window: usize,
    queue_bound: usize,
    accepting: AtomicBool,
    active: AtomicUsize,
}

impl CallSessionRegistry {
    pub fn new(
        registry: &RegistryConfig,
        distributor: &DistributorConfig,
        finalizer: Arc<InsightFinalizer>,
    ) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            finished: Mutex::new(FinishedCalls::new(registry.finished_call_capacity)),
            finalizer,
            subscribe_timeout: registry.subscribe_timeout(),
            closed_grace_period: registry.closed_grace_period(),
            replay_window: distributor.replay_window,
            queue_bound: distributor.subscriber_queue_bound,
            accepting: AtomicBool::new(true),
            active: AtomicUsize::new(0),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(DomainError::ShuttingDown)
        }
    }

    pub fn closed_grace_period(&self) -> Duration {
        self.closed_grace_period
    }

    /// Calls that are open or finalizing
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) async fn slot(&self, call_sid: &CallSid) -> Option<Arc<CallSlot>> {
        self.slots.read().await.get(call_sid).cloned()
    }

    /// Terminal status of a call that already finished, if still remembered
    async fn finished_status(&self, call_sid: &CallSid) -> Option<CallStatus> {
        self.finished.lock().await.status(call_sid)
    }

    async fn slot_or_placeholder(&self, call_sid: &CallSid) -> Arc<CallSlot> {
        if let Some(slot) = self.slot(call_sid).await {
            return slot;
        }

        let mut slots = self.slots.write().await;
        slots
            .entry(call_sid.clone())
            .or_insert_with(|| Arc::new(CallSlot::placeholder(self.replay_window, self.queue_bound)))
            .clone()
    }

    /// Create or advance a call from a lifecycle event
    ///
    /// Exact duplicates are no-ops. Terminal statuses close the call, opening
    /// it first if this is the first event seen for it.
    pub async fn open(&self, event: CallLifecycleEvent) -> Result<CallSession> {
        self.ensure_accepting()?;
        counter!(CALL_EVENTS_TOTAL, "status" => event.status.as_str()).increment(1);

        if event.status.is_terminal() {
            return self
                .finish(&event.call_sid, event.status, event.timestamp, Some(&event))
                .await;
        }

        loop {
            let slot = self.slot_or_placeholder(&event.call_sid).await;
            let mut guard = slot.state.lock().await;
            if guard.evicted {
                continue;
            }

            let phase = guard.phase;
            if let SlotPhase::Pending { .. } = phase {
                if let Some(status) = self.finished_status(&event.call_sid).await {
                    let e = already_finished(&event.call_sid, status, event.status);
                    note_rejected(&e);
                    return Err(e);
                }
                let session = CallSession::open(&event);
                guard.session = Some(session.clone());
                guard.phase = SlotPhase::Active;
                slot.ready.send_replace(true);
                self.call_activated();
                info!(
                    call_sid = %event.call_sid,
                    status = %event.status,
                    direction = event.direction.as_str(),
                    "Call session opened"
                );
                return Ok(session);
            }

            let is_active = phase == SlotPhase::Active;
            let session = guard
                .session
                .as_mut()
                .ok_or_else(|| missing_session(&event.call_sid))?;

            match session.advance(event.status) {
                Ok(StatusChange::Applied) => {
                    info!(call_sid = %event.call_sid, status = %event.status, "Call status changed");
                }
                Ok(StatusChange::Duplicate) => {
                    debug!(call_sid = %event.call_sid, status = %event.status, "Duplicate call event");
                }
                Err(e) => {
                    note_rejected(&e);
                    return Err(e);
                }
            }
            if is_active {
                session.merge_details(&event);
            }
            return Ok(session.clone());
        }
    }

    /// Move a call to a terminal status and hand it to the finalizer
    pub async fn close(&self, call_sid: &CallSid, status: CallStatus) -> Result<CallSession> {
        self.ensure_accepting()?;
        if !status.is_terminal() {
            return Err(DomainError::InvalidTransition(format!(
                "cannot close call {} with non-terminal status {}",
                call_sid, status
            )));
        }
        self.finish(call_sid, status, Utc::now(), None).await
    }

    async fn finish(
        &self,
        call_sid: &CallSid,
        status: CallStatus,
        at: DateTime<Utc>,
        first_event: Option<&CallLifecycleEvent>,
    ) -> Result<CallSession> {
        loop {
            let slot = match first_event {
                Some(_) => self.slot_or_placeholder(call_sid).await,
                None => self.slot(call_sid).await.ok_or_else(|| not_found(call_sid))?,
            };
            let mut guard = slot.state.lock().await;
            if guard.evicted {
                continue;
            }
            let state = &mut *guard;

            match (state.phase, first_event) {
                (SlotPhase::Pending { .. }, Some(event)) => {
                    if let Some(finished) = self.finished_status(call_sid).await {
                        let e = already_finished(call_sid, finished, status);
                        note_rejected(&e);
                        return Err(e);
                    }
                    state.session = Some(CallSession::open(event));
                    state.phase = SlotPhase::Active;
                    slot.ready.send_replace(true);
                    self.call_activated();
                    info!(call_sid = %call_sid, status = %status, "Call first seen with terminal status");
                }
                (SlotPhase::Pending { .. }, None) => return Err(not_found(call_sid)),
                (SlotPhase::Finalizing, _) | (SlotPhase::Closed { .. }, _) => {
                    let session = state.session.as_ref().ok_or_else(|| missing_session(call_sid))?;
                    return match session.check_status(status) {
                        Ok(_) => {
                            debug!(call_sid = %call_sid, status = %status, "Duplicate terminal event");
                            Ok(session.clone())
                        }
                        Err(e) => {
                            note_rejected(&e);
                            Err(e)
                        }
                    };
                }
                (SlotPhase::Active, _) => {}
            }

            let session = state.session.as_mut().ok_or_else(|| missing_session(call_sid))?;
            if let Some(event) = first_event {
                session.merge_details(event);
            }
            if let Err(e) = session.complete(status, at) {
                note_rejected(&e);
                return Err(e);
            }
            session.set_finalization(FinalizationState::Pending);
            let snapshot = session.clone();

            let transcript = state.channel.close();
            let insights = state.insights.take();
            state.phase = SlotPhase::Finalizing;
            self.finished.lock().await.record(call_sid, snapshot.status());
            drop(guard);

            let job = FinalizationJob {
                call_sid: call_sid.clone(),
                record: CallRecord::from(&snapshot),
                transcript,
                insights,
            };
            self.finalizer.submit(job, outcome_hook(Arc::clone(&slot))).await;

            slot.state.lock().await.phase = SlotPhase::Closed {
                closed_at: Instant::now(),
            };
            self.call_deactivated();

            info!(
                call_sid = %call_sid,
                status = %status,
                duration_seconds = ?snapshot.duration_seconds(),
                "Call session closed"
            );
            return Ok(snapshot);
        }
    }

    /// Bind or unbind a media stream
    pub async fn bind_stream(&self, event: StreamEvent) -> Result<()> {
        self.ensure_accepting()?;

        let slot = self
            .slot(&event.call_sid)
            .await
            .ok_or_else(|| not_found(&event.call_sid))?;
        let mut guard = slot.state.lock().await;
        if guard.evicted || matches!(guard.phase, SlotPhase::Pending { .. }) {
            return Err(not_found(&event.call_sid));
        }

        let closed = guard.phase != SlotPhase::Active;
        let session = guard
            .session
            .as_mut()
            .ok_or_else(|| missing_session(&event.call_sid))?;

        let result = match event.status {
            StreamStatus::Started if closed => Err(DomainError::StaleEvent(format!(
                "call {} is closed, ignoring start of stream {}",
                event.call_sid, event.stream_sid
            ))),
            StreamStatus::Started => session
                .start_stream(event.stream_sid.clone(), event.timestamp)
                .map(|()| {
                    info!(call_sid = %event.call_sid, stream_sid = %event.stream_sid, "Stream started");
                }),
            StreamStatus::Stopped => session
                .stop_stream(&event.stream_sid, event.timestamp)
                .map(|change| match change {
                    StatusChange::Applied => {
                        info!(call_sid = %event.call_sid, stream_sid = %event.stream_sid, "Stream stopped")
                    }
                    StatusChange::Duplicate => {
                        debug!(call_sid = %event.call_sid, stream_sid = %event.stream_sid, "Duplicate stream stop")
                    }
                }),
        };

        if let Err(e) = &result {
            note_rejected(e);
        }
        result
    }

    /// Subscribe to a call's live segments
    ///
    /// Waits up to the subscribe timeout for the call to be opened.
    pub async fn subscribe(&self, call_sid: &CallSid) -> Result<Subscription> {
        self.attach(call_sid, None).await
    }

    /// Reconnect, replaying retained segments after `last_seen`
    pub async fn resubscribe(&self, call_sid: &CallSid, last_seen: u64) -> Result<Subscription> {
        self.attach(call_sid, Some(last_seen)).await
    }

    async fn attach(&self, call_sid: &CallSid, after: Option<u64>) -> Result<Subscription> {
        self.ensure_accepting()?;
        let deadline = Instant::now() + self.subscribe_timeout;

        loop {
            let slot = self.slot_or_placeholder(call_sid).await;
            let mut ready = slot.ready.subscribe();
            {
                let mut state = slot.state.lock().await;
                if state.evicted {
                    continue;
                }

                let phase = state.phase;
                match phase {
                    SlotPhase::Active => {
                        let id = SubscriptionId::new();
                        let receiver = state.channel.attach(id, after);
                        debug!(
                            call_sid = %call_sid,
                            subscription = %id,
                            subscribers = state.channel.subscriber_count(),
                            "Subscriber attached"
                        );
                        return Ok(Subscription {
                            handle: SubscriptionHandle {
                                call_sid: call_sid.clone(),
                                id,
                            },
                            receiver,
                        });
                    }
                    SlotPhase::Finalizing | SlotPhase::Closed { .. } => {
                        return Err(DomainError::CallNotFound(format!(
                            "call {} has already ended",
                            call_sid
                        )));
                    }
                    SlotPhase::Pending { .. } => {
                        if self.finished_status(call_sid).await.is_some() {
                            return Err(DomainError::CallNotFound(format!(
                                "call {} has already ended",
                                call_sid
                            )));
                        }
                    }
                }
            }

            let woke = tokio::time::timeout_at(deadline, ready.wait_for(|opened| *opened))
                .await
                .is_ok();
            if !woke {
                return Err(DomainError::CallNotFound(format!(
                    "call {} did not start within {:?}",
                    call_sid, self.subscribe_timeout
                )));
            }
        }
    }

    /// Stop delivering to a subscription; returns whether it was still attached
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let slot = match self.slot(&handle.call_sid).await {
            Some(slot) => slot,
            None => return false,
        };

        let removed = slot.state.lock().await.channel.detach(&handle.id);
        if removed {
            debug!(call_sid = %handle.call_sid, subscription = %handle.id, "Subscriber detached");
        }
        removed
    }

    /// Snapshot of a call's session, if the registry still holds it
    pub async fn get(&self, call_sid: &CallSid) -> Option<CallSession> {
        let slot = self.slot(call_sid).await?;
        let state = slot.state.lock().await;
        if state.evicted {
            return None;
        }
        state.session.clone()
    }

    /// Supply externally computed insights to be persisted at close
    pub async fn attach_insights(&self, call_sid: &CallSid, insights: Insights) -> Result<()> {
        self.ensure_accepting()?;
        if insights.summary.call_sid.trim().to_lowercase() != call_sid.partition_key() {
            return Err(DomainError::ArgumentInvalid(format!(
                "summary belongs to call {}, not {}",
                insights.summary.call_sid, call_sid
            )));
        }
        if let Some(location) = &insights.location {
            location.validate()?;
        }

        let slot = self.slot(call_sid).await.ok_or_else(|| not_found(call_sid))?;
        let mut state = slot.state.lock().await;
        let phase = state.phase;
        match phase {
            _ if state.evicted => Err(not_found(call_sid)),
            SlotPhase::Pending { .. } => Err(not_found(call_sid)),
            SlotPhase::Finalizing | SlotPhase::Closed { .. } => Err(DomainError::StaleEvent(
                format!("call {} already closed, insights ignored", call_sid),
            )),
            SlotPhase::Active => {
                state.insights = Some(insights);
                debug!(call_sid = %call_sid, "Precomputed insights attached");
                Ok(())
            }
        }
    }

    /// Evict closed calls past the grace period and placeholders past the
    /// subscribe timeout; returns how many slots were removed
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let before = slots.len();

        slots.retain(|call_sid, slot| {
            let mut state = match slot.state.try_lock() {
                Ok(state) => state,
                Err(_) => return true,
            };

            let expired = match state.phase {
                SlotPhase::Pending { since } => now.duration_since(since) >= self.subscribe_timeout,
                SlotPhase::Closed { closed_at } => {
                    now.duration_since(closed_at) >= self.closed_grace_period
                }
                SlotPhase::Active | SlotPhase::Finalizing => false,
            };
            if expired {
                state.evicted = true;
                slot.ready.send_replace(true);
                debug!(call_sid = %call_sid, "Evicted call slot");
            }
            !expired
        });

        before - slots.len()
    }

    /// Reject new events, then wait for in-flight finalizations
    pub async fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Call session registry stopped accepting events");
        }
        self.finalizer.drain().await;
    }

    fn call_activated(&self) {
        let count = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        telemetry::update_active_calls(count);
    }

    fn call_deactivated(&self) {
        let count = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        telemetry::update_active_calls(count);
    }
}

fn outcome_hook(slot: Arc<CallSlot>) -> OutcomeHook {
    Box::new(move |outcome| {
        Box::pin(async move {
            let mut state = slot.state.lock().await;
            if let Some(session) = state.session.as_mut() {
                match outcome {
                    FinalizationOutcome::Persisted => {
                        session.set_finalization(FinalizationState::Persisted)
                    }
                    FinalizationOutcome::Failed(_) => session.mark_finalization_failed(),
                }
            }
        })
    })
}

fn note_rejected(e: &DomainError) {
    if e.is_benign() {
        counter!(STALE_EVENTS_TOTAL).increment(1);
        debug!("{}", e);
    } else {
        warn!("Rejected event: {}", e);
    }
}

fn already_finished(call_sid: &CallSid, finished: CallStatus, status: CallStatus) -> DomainError {
    DomainError::StaleEvent(format!(
        "call {} already finished as {}, ignoring {}",
        call_sid, finished, status
    ))
}

fn not_found(call_sid: &CallSid) -> DomainError {
    DomainError::CallNotFound(format!("no session for call {}", call_sid))
}

fn missing_session(call_sid: &CallSid) -> DomainError {
    DomainError::Internal(format!("slot for call {} has no session", call_sid))
}

//! Call session aggregate root

use crate::domain::call::entity::MediaStream;
use crate::domain::call::event::CallLifecycleEvent;
use crate::domain::call::value_object::{CallDirection, CallStatus, FinalizationState};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of applying a lifecycle status to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied,
    Duplicate,
}

/// Call session aggregate root
///
/// Enforces the lifecycle state machine and the single-active-stream rule.
/// `completed_at` and `duration_seconds` are set exactly when the status
/// is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    call_sid: CallSid,
    from: String,
    to: String,
    direction: CallDirection,
    status: CallStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    account_sid: Option<String>,
    active_stream: Option<MediaStream>,
    /// Every stream bound during the call, oldest first
    stream_history: Vec<StreamSid>,
    /// Most recently stopped stream, kept to absorb duplicate stop events
    last_stopped: Option<StreamSid>,
    finalization: FinalizationState,
}

impl CallSession {
    /// Create a session from the first lifecycle event seen for a call
    ///
    /// A terminal first event opens the session as in progress; the caller
    /// is expected to complete it right away.
    pub fn open(event: &CallLifecycleEvent) -> Self {
        let status = if event.status.is_terminal() {
            CallStatus::InProgress
        } else {
            event.status
        };

        Self {
            call_sid: event.call_sid.clone(),
            from: event.from.clone(),
            to: event.to.clone(),
            direction: event.direction,
            status,
            started_at: event.timestamp,
            completed_at: None,
            duration_seconds: None,
            account_sid: event.account_sid.clone(),
            active_stream: None,
            stream_history: Vec::new(),
            last_stopped: None,
            finalization: FinalizationState::NotStarted,
        }
    }

    /// Check whether `status` may be applied without mutating anything
    pub fn check_status(&self, status: CallStatus) -> Result<StatusChange> {
        if self.status == status {
            return Ok(StatusChange::Duplicate);
        }

        if self.status.is_terminal() {
            return Err(DomainError::StaleEvent(format!(
                "call {} already {}, ignoring {}",
                self.call_sid, self.status, status
            )));
        }

        if !self.status.can_transition_to(&status) {
            return Err(DomainError::InvalidTransition(format!(
                "call {} cannot move from {} to {}",
                self.call_sid, self.status, status
            )));
        }

        Ok(StatusChange::Applied)
    }

    /// Apply a non-terminal status
    pub fn advance(&mut self, status: CallStatus) -> Result<StatusChange> {
        if status.is_terminal() {
            return Err(DomainError::InvalidTransition(format!(
                "terminal status {} must go through complete()",
                status
            )));
        }

        let change = self.check_status(status)?;
        if change == StatusChange::Applied {
            self.status = status;
        }
        Ok(change)
    }

    /// Move to a terminal status, stopping any active stream
    pub fn complete(&mut self, status: CallStatus, at: DateTime<Utc>) -> Result<StatusChange> {
        if !status.is_terminal() {
            return Err(DomainError::InvalidTransition(format!(
                "{} is not a terminal status",
                status
            )));
        }

        let change = self.check_status(status)?;
        if change == StatusChange::Duplicate {
            return Ok(change);
        }

        if let Some(mut stream) = self.active_stream.take() {
            stream.stop(at);
            self.last_stopped = Some(stream.stream_sid().clone());
        }

        let completed_at = at.max(self.started_at);
        self.status = status;
        self.completed_at = Some(completed_at);
        self.duration_seconds = Some((completed_at - self.started_at).num_seconds());
        Ok(StatusChange::Applied)
    }

    /// Fill in party details a later event carries but the first one lacked
    pub fn merge_details(&mut self, event: &CallLifecycleEvent) {
        if self.from.is_empty() && !event.from.is_empty() {
            self.from = event.from.clone();
        }
        if self.to.is_empty() && !event.to.is_empty() {
            self.to = event.to.clone();
        }
        if self.account_sid.is_none() {
            self.account_sid = event.account_sid.clone();
        }
    }

    /// Bind a newly started media stream
    pub fn start_stream(&mut self, stream_sid: StreamSid, at: DateTime<Utc>) -> Result<()> {
        if let Some(active) = &self.active_stream {
            return Err(DomainError::StreamConflict(format!(
                "call {} already has active stream {}, rejecting {}",
                self.call_sid,
                active.stream_sid(),
                stream_sid
            )));
        }

        self.stream_history.push(stream_sid.clone());
        self.active_stream = Some(MediaStream::start(stream_sid, self.call_sid.clone(), at));
        Ok(())
    }

    /// Unbind the active media stream
    pub fn stop_stream(&mut self, stream_sid: &StreamSid, at: DateTime<Utc>) -> Result<StatusChange> {
        match &self.active_stream {
            Some(active) if active.stream_sid() == stream_sid => {
                if let Some(mut stream) = self.active_stream.take() {
                    stream.stop(at);
                }
                self.last_stopped = Some(stream_sid.clone());
                Ok(StatusChange::Applied)
            }
            None if self.last_stopped.as_ref() == Some(stream_sid) => Ok(StatusChange::Duplicate),
            _ => Err(DomainError::UnknownStream(format!(
                "stream {} is not the active stream of call {}",
                stream_sid, self.call_sid
            ))),
        }
    }

    pub fn set_finalization(&mut self, state: FinalizationState) {
        self.finalization = state;
    }

    /// Surface a failed hand-off on an already-terminal session
    pub fn mark_finalization_failed(&mut self) {
        self.finalization = FinalizationState::Failed;
        self.status = CallStatus::Failed;
    }

    // Getters
    pub fn call_sid(&self) -> &CallSid {
        &self.call_sid
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.duration_seconds
    }

    pub fn account_sid(&self) -> Option<&str> {
        self.account_sid.as_deref()
    }

    pub fn active_stream(&self) -> Option<&MediaStream> {
        self.active_stream.as_ref()
    }

    pub fn stream_history(&self) -> &[StreamSid] {
        &self.stream_history
    }

    pub fn finalization(&self) -> FinalizationState {
        self.finalization
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sid(s: &str) -> CallSid {
        CallSid::parse(s).unwrap()
    }

    fn stream(s: &str) -> StreamSid {
        StreamSid::parse(s).unwrap()
    }

    fn create_test_session() -> CallSession {
        let event = CallLifecycleEvent::new(sid("CA123"), CallStatus::Queued)
            .with_parties("+15550001", "+15550002");
        CallSession::open(&event)
    }

    #[test]
    fn test_call_lifecycle() {
        let mut session = create_test_session();
        assert_eq!(session.status(), CallStatus::Queued);
        assert!(session.completed_at().is_none());

        assert_eq!(session.advance(CallStatus::Ringing).unwrap(), StatusChange::Applied);
        assert_eq!(session.advance(CallStatus::InProgress).unwrap(), StatusChange::Applied);

        let end = session.started_at() + Duration::seconds(42);
        session.complete(CallStatus::Completed, end).unwrap();
        assert_eq!(session.status(), CallStatus::Completed);
        assert_eq!(session.completed_at(), Some(end));
        assert_eq!(session.duration_seconds(), Some(42));
    }

    #[test]
    fn test_ringing_may_be_skipped() {
        let mut session = create_test_session();
        assert!(session.advance(CallStatus::InProgress).is_ok());
    }

    #[test]
    fn test_invalid_state_transition() {
        let mut session = create_test_session();
        session.advance(CallStatus::InProgress).unwrap();

        let result = session.advance(CallStatus::Ringing);
        assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
        assert_eq!(session.status(), CallStatus::InProgress);

        let mut queued = create_test_session();
        let result = queued.complete(CallStatus::Completed, Utc::now());
        assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
        assert!(queued.completed_at().is_none());
    }

    #[test]
    fn test_duplicate_status_is_noop() {
        let mut session = create_test_session();
        assert_eq!(session.advance(CallStatus::Queued).unwrap(), StatusChange::Duplicate);
    }

    #[test]
    fn test_terminal_is_absorbing() {
        let mut session = create_test_session();
        session.advance(CallStatus::InProgress).unwrap();
        let end = Utc::now();
        session.complete(CallStatus::Completed, end).unwrap();

        let again = session.complete(CallStatus::Completed, end + Duration::seconds(5));
        assert_eq!(again.unwrap(), StatusChange::Duplicate);
        assert_eq!(session.completed_at(), Some(end.max(session.started_at())));

        let stale = session.complete(CallStatus::Failed, end);
        assert!(matches!(stale, Err(DomainError::StaleEvent(_))));
        let stale = session.advance(CallStatus::Ringing);
        assert!(matches!(stale, Err(DomainError::StaleEvent(_))));
    }

    #[test]
    fn test_stream_binding() {
        let mut session = create_test_session();
        session.start_stream(stream("MZ1"), Utc::now()).unwrap();

        let conflict = session.start_stream(stream("MZ2"), Utc::now());
        assert!(matches!(conflict, Err(DomainError::StreamConflict(_))));

        let unknown = session.stop_stream(&stream("MZ2"), Utc::now());
        assert!(matches!(unknown, Err(DomainError::UnknownStream(_))));

        assert_eq!(
            session.stop_stream(&stream("MZ1"), Utc::now()).unwrap(),
            StatusChange::Applied
        );
        assert!(session.active_stream().is_none());
        assert_eq!(
            session.stop_stream(&stream("MZ1"), Utc::now()).unwrap(),
            StatusChange::Duplicate
        );

        session.start_stream(stream("MZ2"), Utc::now()).unwrap();
        assert_eq!(session.stream_history().len(), 2);
    }

    #[test]
    fn test_complete_stops_active_stream() {
        let mut session = create_test_session();
        session.advance(CallStatus::InProgress).unwrap();
        session.start_stream(stream("MZ1"), Utc::now()).unwrap();

        session.complete(CallStatus::Completed, Utc::now()).unwrap();
        assert!(session.active_stream().is_none());
        assert!(session.stop_stream(&stream("MZ1"), Utc::now()).is_ok());
    }

    #[test]
    fn test_duration_never_negative() {
        let mut session = create_test_session();
        session.advance(CallStatus::InProgress).unwrap();
        let before_start = session.started_at() - Duration::seconds(10);
        session.complete(CallStatus::Completed, before_start).unwrap();
        assert_eq!(session.duration_seconds(), Some(0));
    }
}

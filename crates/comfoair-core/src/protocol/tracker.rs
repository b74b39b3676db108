//! Pending request tracking
//!
//! Owns the lifecycle of the single in-flight request:
//!
//! ```text
//! read:  AwaitingAck -> AwaitingData -> Completed | Evicted
//! write: AwaitingAck -> Completed | Evicted
//! ```
//!
//! The tracker never touches the transport. Operations return what the
//! caller has to do next (retransmit, drain the queue, raise an alert).

use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::{CommandKind, ProtocolError};

/// Phase of the pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Transmitted, waiting for the ACK token
    AwaitingAck,
    /// Read request acknowledged, waiting for the response frame
    AwaitingData,
}

/// The request currently in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Request command id
    pub command: u16,
    /// Read or write
    pub kind: CommandKind,
    /// Response id that completes a read
    pub response_id: Option<u16>,
    /// Payload as first submitted, reused on every retransmission
    pub payload: Vec<u8>,
    /// ACK seen for the current attempt
    pub ack_received: bool,
    /// Start of the current phase
    pub phase_started_at: Instant,
    /// Retries spent so far, shared by both phases
    pub retry_count: u32,
}

impl PendingRequest {
    /// Current phase
    pub fn phase(&self) -> RequestPhase {
        if self.ack_received {
            RequestPhase::AwaitingData
        } else {
            RequestPhase::AwaitingAck
        }
    }
}

/// Result of an ACK arriving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Nothing was pending
    Idle,
    /// Write request finished
    Completed(u16),
    /// Read request now waits for its response
    AwaitingData(u16),
    /// Read request already acknowledged
    Duplicate(u16),
}

/// Result of a timeout check
#[derive(Debug)]
pub enum TimeoutOutcome {
    /// Nothing was pending
    Idle,
    /// Pending request is still within its phase timeout
    Waiting,
    /// Phase timed out, send the request again
    Retransmit {
        command: u16,
        payload: Vec<u8>,
        retry: u32,
    },
    /// Retry budget exhausted, tracking dropped
    Evicted(ProtocolError),
}

/// Tracks at most one outstanding request
#[derive(Debug, Default)]
pub struct PendingRequestTracker {
    pending: Option<PendingRequest>,
}

impl PendingRequestTracker {
    /// Create an idle tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly transmitted request
    pub fn submit(
        &mut self,
        command: u16,
        kind: CommandKind,
        response_id: Option<u16>,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        if let Some(current) = &self.pending {
            debug!(
                "tracker: refusing {:#06x}, {:#06x} still pending",
                command, current.command
            );
            return Err(ProtocolError::AlreadyPending(command));
        }

        debug!("tracker: new pending request {:#06x} ({:?})", command, kind);
        self.pending = Some(PendingRequest {
            command,
            kind,
            response_id,
            payload,
            ack_received: false,
            phase_started_at: now,
            retry_count: 0,
        });
        Ok(())
    }

    /// Handle an ACK token
    pub fn on_ack(&mut self, now: Instant) -> AckOutcome {
        let Some(request) = self.pending.as_mut() else {
            debug!("tracker: ACK without pending request");
            return AckOutcome::Idle;
        };

        match (request.kind, request.ack_received) {
            (CommandKind::Write, _) => {
                let command = request.command;
                self.pending = None;
                debug!("tracker: write {:#06x} completed by ACK", command);
                AckOutcome::Completed(command)
            }
            (CommandKind::Read, false) => {
                request.ack_received = true;
                request.phase_started_at = now;
                debug!("tracker: read {:#06x} acknowledged, awaiting data", request.command);
                AckOutcome::AwaitingData(request.command)
            }
            (CommandKind::Read, true) => AckOutcome::Duplicate(request.command),
        }
    }

    /// Handle a valid response frame; returns the completed request id
    pub fn on_response_matched(&mut self, response_id: u16) -> Option<u16> {
        match &self.pending {
            Some(request) if request.response_id == Some(response_id) => {
                let command = request.command;
                self.pending = None;
                debug!(
                    "tracker: response {:#06x} completes request {:#06x}",
                    response_id, command
                );
                Some(command)
            }
            _ => {
                warn!("tracker: response {:#06x} without matching pending request", response_id);
                None
            }
        }
    }

    /// Check phase timeouts; called on every external tick
    pub fn check_timeouts(
        &mut self,
        now: Instant,
        ack_timeout: Duration,
        data_timeout: Duration,
        max_retry: u32,
    ) -> TimeoutOutcome {
        let Some(request) = self.pending.as_mut() else {
            return TimeoutOutcome::Idle;
        };

        let phase = request.phase();
        let timeout = match phase {
            RequestPhase::AwaitingAck => ack_timeout,
            RequestPhase::AwaitingData => data_timeout,
        };

        if now.saturating_duration_since(request.phase_started_at) <= timeout {
            return TimeoutOutcome::Waiting;
        }

        request.retry_count += 1;

        if request.retry_count > max_retry {
            let command = request.command;
            self.pending = None;
            let err = match phase {
                RequestPhase::AwaitingAck => ProtocolError::AckTimeoutExceeded {
                    command,
                    retries: max_retry,
                },
                RequestPhase::AwaitingData => ProtocolError::DataTimeoutExceeded {
                    command,
                    retries: max_retry,
                },
            };
            error!("tracker: evicting {:#06x}: {}", command, err);
            return TimeoutOutcome::Evicted(err);
        }

        // A data timeout restarts the request from the ACK phase
        request.ack_received = false;
        request.phase_started_at = now;
        warn!(
            "tracker: {:?} timeout for {:#06x}, retry {}/{}",
            phase, request.command, request.retry_count, max_retry
        );

        TimeoutOutcome::Retransmit {
            command: request.command,
            payload: request.payload.clone(),
            retry: request.retry_count,
        }
    }

    /// Currently tracked request
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// True if a request with this id is tracked
    pub fn is_tracking(&self, command: u16) -> bool {
        self.pending.as_ref().is_some_and(|r| r.command == command)
    }

    /// True if nothing is in flight
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACK_TIMEOUT: Duration = Duration::from_secs(5);
    const DATA_TIMEOUT: Duration = Duration::from_secs(10);

    fn read_tracker(now: Instant) -> PendingRequestTracker {
        let mut tracker = PendingRequestTracker::new();
        tracker
            .submit(0x00D1, CommandKind::Read, Some(0x00D2), vec![], now)
            .unwrap();
        tracker
    }

    #[test]
    fn test_second_submit_fails() {
        let now = Instant::now();
        let mut tracker = read_tracker(now);
        let err = tracker
            .submit(0x00CD, CommandKind::Read, Some(0x00CE), vec![], now)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyPending(0x00CD)));
        assert!(tracker.is_tracking(0x00D1));
    }

    #[test]
    fn test_ack_moves_read_to_data_phase() {
        let t0 = Instant::now();
        let mut tracker = read_tracker(t0);
        let t1 = t0 + Duration::from_secs(2);

        assert_eq!(tracker.on_ack(t1), AckOutcome::AwaitingData(0x00D1));
        let pending = tracker.pending().unwrap();
        assert_eq!(pending.phase(), RequestPhase::AwaitingData);
        assert_eq!(pending.phase_started_at, t1);

        assert_eq!(tracker.on_ack(t1), AckOutcome::Duplicate(0x00D1));
        assert!(!tracker.is_idle());
    }

    #[test]
    fn test_ack_completes_write() {
        let now = Instant::now();
        let mut tracker = PendingRequestTracker::new();
        tracker
            .submit(0x0099, CommandKind::Write, None, vec![2], now)
            .unwrap();
        assert_eq!(tracker.on_ack(now), AckOutcome::Completed(0x0099));
        assert!(tracker.is_idle());
        assert_eq!(tracker.on_ack(now), AckOutcome::Idle);
    }

    #[test]
    fn test_response_matching() {
        let now = Instant::now();
        let mut tracker = read_tracker(now);
        assert_eq!(tracker.on_response_matched(0x00CE), None);
        assert!(!tracker.is_idle());
        assert_eq!(tracker.on_response_matched(0x00D2), Some(0x00D1));
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_ack_timeout_retransmits() {
        let t0 = Instant::now();
        let mut tracker = read_tracker(t0);

        assert!(matches!(
            tracker.check_timeouts(t0 + ACK_TIMEOUT, ACK_TIMEOUT, DATA_TIMEOUT, 3),
            TimeoutOutcome::Waiting
        ));

        let t1 = t0 + Duration::from_secs(6);
        match tracker.check_timeouts(t1, ACK_TIMEOUT, DATA_TIMEOUT, 3) {
            TimeoutOutcome::Retransmit { command, retry, .. } => {
                assert_eq!(command, 0x00D1);
                assert_eq!(retry, 1);
            }
            other => panic!("expected retransmit, got {:?}", other),
        }
        assert_eq!(tracker.pending().unwrap().phase_started_at, t1);
    }

    #[test]
    fn test_data_timeout_reverts_to_ack_phase() {
        let t0 = Instant::now();
        let mut tracker = read_tracker(t0);
        tracker.on_ack(t0);

        // ACK timeout does not apply in the data phase
        assert!(matches!(
            tracker.check_timeouts(t0 + Duration::from_secs(8), ACK_TIMEOUT, DATA_TIMEOUT, 3),
            TimeoutOutcome::Waiting
        ));
        assert!(matches!(
            tracker.check_timeouts(t0 + Duration::from_secs(11), ACK_TIMEOUT, DATA_TIMEOUT, 3),
            TimeoutOutcome::Retransmit { retry: 1, .. }
        ));
        assert_eq!(tracker.pending().unwrap().phase(), RequestPhase::AwaitingAck);
    }

    #[test]
    fn test_retry_budget_shared_between_phases() {
        let mut now = Instant::now();
        let mut tracker = read_tracker(now);
        let step = Duration::from_secs(11);

        // ack timeout, data timeout, ack timeout
        now += step;
        assert!(matches!(
            tracker.check_timeouts(now, ACK_TIMEOUT, DATA_TIMEOUT, 3),
            TimeoutOutcome::Retransmit { retry: 1, .. }
        ));
        tracker.on_ack(now);
        now += step;
        assert!(matches!(
            tracker.check_timeouts(now, ACK_TIMEOUT, DATA_TIMEOUT, 3),
            TimeoutOutcome::Retransmit { retry: 2, .. }
        ));
        now += step;
        assert!(matches!(
            tracker.check_timeouts(now, ACK_TIMEOUT, DATA_TIMEOUT, 3),
            TimeoutOutcome::Retransmit { retry: 3, .. }
        ));
        tracker.on_ack(now);
        now += step;
        match tracker.check_timeouts(now, ACK_TIMEOUT, DATA_TIMEOUT, 3) {
            TimeoutOutcome::Evicted(ProtocolError::DataTimeoutExceeded { command, retries }) => {
                assert_eq!(command, 0x00D1);
                assert_eq!(retries, 3);
            }
            other => panic!("expected data timeout eviction, got {:?}", other),
        }
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_idle_tick() {
        let mut tracker = PendingRequestTracker::new();
        assert!(matches!(
            tracker.check_timeouts(Instant::now(), ACK_TIMEOUT, DATA_TIMEOUT, 3),
            TimeoutOutcome::Idle
        ));
    }
}

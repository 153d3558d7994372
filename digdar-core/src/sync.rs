//! Synchronisation state machine.
//!
//! Pure bookkeeping for the poll/push loop: which requests are in flight,
//! whether a push is owed a replay, which timeout to use and how to react to
//! a failed poll. No I/O happens here; the async driver performs requests
//! and reports back.
//!
//! # Rules
//!
//! - At most one push in flight. A push requested meanwhile sets the
//!   single-slot `queued` flag; when the in-flight push completes exactly
//!   one replay is owed.
//! - At most one poll in flight.
//! - A push that asks for a server autoscale uses the long timeout, and so
//!   does the poll that follows it (once).
//! - A failed poll is retried once immediately; a second consecutive
//!   failure is fatal.
//!
//! # Usage
//!
//! ```rust
//! use digdar_core::sync::{PushDecision, SyncMachine, SyncState};
//!
//! let mut m = SyncMachine::new();
//! assert!(matches!(m.request_push(false, true, false), PushDecision::Dispatch { .. }));
//! assert_eq!(m.request_push(false, true, false), PushDecision::Coalesced);
//! assert_eq!(m.state(), SyncState::PushPending);
//!
//! // The in-flight push completes: one replay is owed
//! assert!(m.push_completed());
//! assert_eq!(m.state(), SyncState::Replaying);
//! ```

use serde::{Deserialize, Serialize};

/// Default request timeout in milliseconds.
pub const REQUEST_TIMEOUT_MS: u64 = 3_000;
/// Timeout used around a server side autoscale, in milliseconds.
pub const LONG_TIMEOUT_MS: u64 = 20_000;

// =============================================================================
// Sync State
// =============================================================================

/// Coarse state of the loop, for display and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Nothing in flight
    Idle,
    /// A poll is in flight
    Polling,
    /// A push is in flight
    PushPending,
    /// A push completed with another one queued behind it
    Replaying,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Idle
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "Idle"),
            SyncState::Polling => write!(f, "Polling"),
            SyncState::PushPending => write!(f, "Push Pending"),
            SyncState::Replaying => write!(f, "Replaying"),
        }
    }
}

// =============================================================================
// Dispatch State
// =============================================================================

/// Single-flight flag plus one pending slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchState {
    sending: bool,
    queued: bool,
}

impl DispatchState {
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }
}

/// Result of asking for a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDecision {
    /// Send now with this timeout
    Dispatch { timeout_ms: u64 },
    /// Another push is in flight; a replay has been queued
    Coalesced,
    /// Nothing to send
    Skipped,
}

/// What to do after a poll failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFailure {
    /// First failure: poll again right away
    RetryNow,
    /// Second consecutive failure: stop and tell the operator
    Fatal,
}

/// Handle for an in-flight poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTicket {
    pub timeout_ms: u64,
    /// The poll consumed the long timeout armed by an autoscale push
    pub long: bool,
}

// =============================================================================
// Sync Machine
// =============================================================================

#[derive(Debug, Clone)]
pub struct SyncMachine {
    dispatch: DispatchState,
    downloading: bool,
    last_poll_failed: bool,
    long_armed: bool,
    replay_pending: bool,
    short_ms: u64,
    long_ms: u64,
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMachine {
    pub fn new() -> Self {
        Self::with_timeouts(REQUEST_TIMEOUT_MS, LONG_TIMEOUT_MS)
    }

    pub fn with_timeouts(short_ms: u64, long_ms: u64) -> Self {
        SyncMachine {
            dispatch: DispatchState::default(),
            downloading: false,
            last_poll_failed: false,
            long_armed: false,
            replay_pending: false,
            short_ms,
            long_ms,
        }
    }

    /// Derived state; a pending replay takes priority over in-flight work.
    pub fn state(&self) -> SyncState {
        if self.replay_pending {
            SyncState::Replaying
        } else if self.dispatch.sending {
            SyncState::PushPending
        } else if self.downloading {
            SyncState::Polling
        } else {
            SyncState::Idle
        }
    }

    pub fn dispatch(&self) -> DispatchState {
        self.dispatch
    }

    pub fn is_polling(&self) -> bool {
        self.downloading
    }

    pub fn is_pushing(&self) -> bool {
        self.dispatch.sending
    }

    pub fn replay_pending(&self) -> bool {
        self.replay_pending
    }

    pub fn long_timeout_armed(&self) -> bool {
        self.long_armed
    }

    // -------------------------------------------------------------------------
    // Push
    // -------------------------------------------------------------------------

    /// Ask to push. `dirty` is the current diff state, `autoscale` whether
    /// the payload carries an autoscale request.
    pub fn request_push(&mut self, force: bool, dirty: bool, autoscale: bool) -> PushDecision {
        if self.dispatch.sending {
            self.dispatch.queued = true;
            return PushDecision::Coalesced;
        }
        if !force && !dirty {
            return PushDecision::Skipped;
        }
        self.dispatch.sending = true;
        self.long_armed = autoscale;
        PushDecision::Dispatch {
            timeout_ms: if autoscale { self.long_ms } else { self.short_ms },
        }
    }

    /// The in-flight push finished, successfully or not. Returns true when a
    /// replay is owed; the caller schedules it and later calls
    /// [`take_replay`](Self::take_replay).
    pub fn push_completed(&mut self) -> bool {
        self.dispatch.sending = false;
        let owed = std::mem::take(&mut self.dispatch.queued);
        if owed {
            self.replay_pending = true;
        }
        owed
    }

    /// Drop a queued replay, as after a server side push error.
    pub fn clear_queue(&mut self) {
        self.dispatch.queued = false;
        self.replay_pending = false;
    }

    /// Consume the pending replay. False if it was dropped meanwhile.
    pub fn take_replay(&mut self) -> bool {
        std::mem::take(&mut self.replay_pending)
    }

    // -------------------------------------------------------------------------
    // Poll
    // -------------------------------------------------------------------------

    /// Start a poll unless one is in flight.
    pub fn request_poll(&mut self) -> Option<PollTicket> {
        if self.downloading {
            return None;
        }
        self.downloading = true;
        let long = self.long_armed;
        Some(PollTicket {
            timeout_ms: if long { self.long_ms } else { self.short_ms },
            long,
        })
    }

    pub fn poll_succeeded(&mut self, ticket: PollTicket) {
        self.downloading = false;
        self.last_poll_failed = false;
        self.finish_ticket(ticket);
    }

    pub fn poll_failed(&mut self, ticket: PollTicket) -> PollFailure {
        self.downloading = false;
        self.finish_ticket(ticket);
        if self.last_poll_failed {
            self.last_poll_failed = false;
            PollFailure::Fatal
        } else {
            self.last_poll_failed = true;
            PollFailure::RetryNow
        }
    }

    fn finish_ticket(&mut self, ticket: PollTicket) {
        if ticket.long {
            self.long_armed = false;
        }
    }

    /// Forget everything in flight, as on an application restart.
    ///
    /// Completions of requests already on the wire are still delivered; the
    /// flags they clear are simply already clear.
    pub fn reset(&mut self) {
        *self = Self::with_timeouts(self.short_ms, self.long_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_push_is_skipped_unless_forced() {
        let mut m = SyncMachine::new();
        assert_eq!(m.request_push(false, false, false), PushDecision::Skipped);
        assert_eq!(m.state(), SyncState::Idle);
        assert_eq!(
            m.request_push(true, false, false),
            PushDecision::Dispatch {
                timeout_ms: REQUEST_TIMEOUT_MS
            }
        );
        assert_eq!(m.state(), SyncState::PushPending);
    }

    #[test]
    fn test_coalescing_owes_exactly_one_replay() {
        let mut m = SyncMachine::new();
        assert!(matches!(
            m.request_push(false, true, false),
            PushDecision::Dispatch { .. }
        ));
        for _ in 0..5 {
            assert_eq!(m.request_push(false, true, false), PushDecision::Coalesced);
        }
        assert!(m.push_completed());
        assert_eq!(m.state(), SyncState::Replaying);
        assert!(m.take_replay());
        assert!(!m.take_replay());
        assert_eq!(m.state(), SyncState::Idle);

        // Replay goes out, nothing queued behind it
        assert!(matches!(
            m.request_push(true, false, false),
            PushDecision::Dispatch { .. }
        ));
        assert!(!m.push_completed());
    }

    #[test]
    fn test_clear_queue_drops_replay() {
        let mut m = SyncMachine::new();
        m.request_push(true, false, false);
        m.request_push(true, false, false);
        m.clear_queue();
        assert!(!m.push_completed());
        assert!(!m.replay_pending());
    }

    #[test]
    fn test_long_timeout_spans_push_and_next_poll() {
        let mut m = SyncMachine::new();
        assert_eq!(
            m.request_push(false, false, true),
            PushDecision::Skipped,
            "autoscale alone does not make the store dirty"
        );
        assert_eq!(
            m.request_push(true, false, true),
            PushDecision::Dispatch {
                timeout_ms: LONG_TIMEOUT_MS
            }
        );
        m.push_completed();

        let ticket = m.request_poll().unwrap();
        assert!(ticket.long);
        assert_eq!(ticket.timeout_ms, LONG_TIMEOUT_MS);
        m.poll_succeeded(ticket);

        let ticket = m.request_poll().unwrap();
        assert!(!ticket.long);
        assert_eq!(ticket.timeout_ms, REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn test_single_poll_in_flight() {
        let mut m = SyncMachine::new();
        let ticket = m.request_poll().unwrap();
        assert_eq!(m.state(), SyncState::Polling);
        assert!(m.request_poll().is_none());
        m.poll_succeeded(ticket);
        assert!(m.request_poll().is_some());
    }

    #[test]
    fn test_poll_retry_once_then_fatal() {
        let mut m = SyncMachine::new();
        let t = m.request_poll().unwrap();
        assert_eq!(m.poll_failed(t), PollFailure::RetryNow);
        let t = m.request_poll().unwrap();
        assert_eq!(m.poll_failed(t), PollFailure::Fatal);

        // Counter resets after a fatal failure
        let t = m.request_poll().unwrap();
        assert_eq!(m.poll_failed(t), PollFailure::RetryNow);
        let t = m.request_poll().unwrap();
        m.poll_succeeded(t);
        let t = m.request_poll().unwrap();
        assert_eq!(m.poll_failed(t), PollFailure::RetryNow);
    }

    #[test]
    fn test_state_priority() {
        let mut m = SyncMachine::new();
        m.request_poll();
        m.request_push(true, false, false);
        assert_eq!(m.state(), SyncState::PushPending);
        m.request_push(true, false, false);
        m.push_completed();
        assert_eq!(m.state(), SyncState::Replaying);
        assert_eq!(SyncState::PushPending.to_string(), "Push Pending");
    }
}

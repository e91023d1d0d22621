//! Stall and timeout policy for the status poller.
//!
//! [`PollTracker`] is a small state machine fed one observation per tick.
//! It owns no timer; the scheduler drives it and acts on the returned
//! [`PollDecision`]. Time is passed in explicitly so the policy can be
//! exercised without waiting.

use std::time::Duration;

use crate::types::Timestamp;
use crate::vendor_status::VendorState;

/// Default interval between status checks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of consecutive stalled ticks before a task is parked.
pub const DEFAULT_STALL_THRESHOLD: u32 = 20;

/// Default wall-clock budget for one polling session.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Tunable polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub tick_interval: Duration,
    /// Consecutive `running` ticks without fresh progress before parking.
    pub stall_threshold: u32,
    /// Wall-clock limit for one polling session before parking.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Why a task was parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkReason {
    Stalled { stall_count: u32 },
    TimedOut { elapsed: Duration },
}

impl std::fmt::Display for ParkReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParkReason::Stalled { stall_count } => {
                write!(f, "no progress for {stall_count} consecutive checks")
            }
            ParkReason::TimedOut { elapsed } => {
                write!(f, "still running after {}s", elapsed.as_secs())
            }
        }
    }
}

/// What the scheduler should do after a non-terminal observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Continue,
    Park(ParkReason),
}

/// Per-session polling state.
#[derive(Debug, Clone)]
pub struct PollTracker {
    policy: PollPolicy,
    started_at: Timestamp,
    attempts: u32,
    stall_count: u32,
    last_progress: Option<u8>,
    seen_running: bool,
}

impl PollTracker {
    pub fn new(policy: PollPolicy, started_at: Timestamp) -> Self {
        Self {
            policy,
            started_at,
            attempts: 0,
            stall_count: 0,
            last_progress: None,
            seen_running: false,
        }
    }

    /// Continue counting attempts from a previously persisted value.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    pub fn last_progress(&self) -> Option<u8> {
        self.last_progress
    }

    /// Record a non-terminal vendor observation.
    ///
    /// Ticks before the first `running` observation never count as stalls,
    /// and the first `running` observation only establishes the baseline.
    pub fn observe(
        &mut self,
        state: VendorState,
        progress: Option<u8>,
        now: Timestamp,
    ) -> PollDecision {
        self.attempts = self.attempts.saturating_add(1);

        if state == VendorState::Running {
            if !self.seen_running {
                self.seen_running = true;
                self.last_progress = progress;
                self.stall_count = 0;
            } else if progress.is_some() && progress != self.last_progress {
                self.last_progress = progress;
                self.stall_count = 0;
            } else {
                self.stall_count = self.stall_count.saturating_add(1);
            }
        }

        self.decide(now)
    }

    /// Record a tick whose status check failed transiently.
    ///
    /// Counts as an attempt but not as a stall; only the wall-clock
    /// timeout can park the task.
    pub fn record_error(&mut self, now: Timestamp) -> PollDecision {
        self.attempts = self.attempts.saturating_add(1);
        self.timeout_check(now)
    }

    fn decide(&self, now: Timestamp) -> PollDecision {
        if self.stall_count >= self.policy.stall_threshold {
            return PollDecision::Park(ParkReason::Stalled {
                stall_count: self.stall_count,
            });
        }
        self.timeout_check(now)
    }

    fn timeout_check(&self, now: Timestamp) -> PollDecision {
        let elapsed = (now - self.started_at).to_std().unwrap_or_default();
        if elapsed >= self.policy.timeout {
            PollDecision::Park(ParkReason::TimedOut { elapsed })
        } else {
            PollDecision::Continue
        }
    }
}

//! Cooperative cancellation
//!
//! `HaltFlag` is the one value shared across threads outside the queuing
//! discipline: it is set from any thread and read by a long-running call that
//! is blocking its own loop, so a queued request could never be seen.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::id::ObjectId;

/// Default interval between halt checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// How a polling loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The flag was observed set
    Halted { iterations: u64 },
    /// The step reported it was done
    Completed { iterations: u64 },
}

impl PollOutcome {
    pub fn iterations(&self) -> u64 {
        match self {
            PollOutcome::Halted { iterations } | PollOutcome::Completed { iterations } => *iterations,
        }
    }

    pub fn was_halted(&self) -> bool {
        matches!(self, PollOutcome::Halted { .. })
    }
}

/// Atomic, polled stop request
#[derive(Debug, Clone)]
pub struct HaltFlag {
    halted: Arc<AtomicBool>,
    owner: Option<ObjectId>,
    interval: Duration,
}

impl Default for HaltFlag {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl HaltFlag {
    pub fn new(interval: Duration) -> Self {
        Self {
            halted: Arc::new(AtomicBool::new(false)),
            owner: None,
            interval,
        }
    }

    /// Flag owned by a specific object (for log context)
    pub fn for_object(owner: ObjectId, interval: Duration) -> Self {
        Self {
            owner: Some(owner),
            ..Self::new(interval)
        }
    }

    pub fn owner(&self) -> Option<ObjectId> {
        self.owner
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Request a halt. Safe from any thread; returns `true` for the first request.
    pub fn request_halt(&self) -> bool {
        let first = !self.halted.swap(true, Ordering::Release);
        if first {
            info!(owner = ?self.owner, "halt requested");
        }
        first
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Clear the flag so the owner can run again
    pub fn reset(&self) {
        self.halted.store(false, Ordering::Release);
    }

    /// Run `step` repeatedly, sleeping one interval between steps, until the
    /// flag is set or `step` breaks.
    ///
    /// The flag is checked before every step, so a halt is observed at most one
    /// interval (plus one step) after it is requested.
    pub fn poll<F>(&self, mut step: F) -> PollOutcome
    where
        F: FnMut(u64) -> ControlFlow<()>,
    {
        let mut iterations = 0;
        loop {
            if self.is_halted() {
                debug!(owner = ?self.owner, iterations, "polling loop halted");
                return PollOutcome::Halted { iterations };
            }
            if step(iterations).is_break() {
                return PollOutcome::Completed {
                    iterations: iterations + 1,
                };
            }
            iterations += 1;
            std::thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_request_halt_is_idempotent() {
        let flag = HaltFlag::new(Duration::from_millis(10));
        assert!(!flag.is_halted());
        assert!(flag.request_halt());
        assert!(!flag.request_halt());
        assert!(flag.is_halted());
    }

    #[test]
    fn test_reset_clears_flag() {
        let flag = HaltFlag::new(Duration::from_millis(10));
        flag.request_halt();
        flag.reset();
        assert!(!flag.is_halted());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = HaltFlag::for_object(ObjectId::from_raw(1), Duration::from_millis(10));
        let other = flag.clone();
        other.request_halt();
        assert!(flag.is_halted());
        assert_eq!(flag.owner(), Some(ObjectId::from_raw(1)));
    }

    #[test]
    fn test_poll_completes_when_step_breaks() {
        let flag = HaltFlag::new(Duration::from_millis(1));
        let outcome = flag.poll(|i| if i == 2 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) });
        assert_eq!(outcome, PollOutcome::Completed { iterations: 3 });
    }

    #[test]
    fn test_poll_stops_immediately_when_already_halted() {
        let flag = HaltFlag::new(Duration::from_secs(10));
        flag.request_halt();
        let outcome = flag.poll(|_| ControlFlow::Continue(()));
        assert_eq!(outcome, PollOutcome::Halted { iterations: 0 });
    }

    #[test]
    fn test_halt_from_other_thread_observed_within_interval() {
        let interval = Duration::from_millis(100);
        let flag = HaltFlag::new(interval);
        let remote = flag.clone();

        let requested_at = Arc::new(std::sync::Mutex::new(None));
        let stamp = requested_at.clone();
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            *stamp.lock().unwrap() = Some(Instant::now());
            remote.request_halt();
        });

        let outcome = flag.poll(|_| ControlFlow::Continue(()));
        let exited_at = Instant::now();
        setter.join().unwrap();

        assert!(outcome.was_halted());
        let requested_at = requested_at.lock().unwrap().unwrap();
        let latency = exited_at.saturating_duration_since(requested_at);
        assert!(latency <= interval + Duration::from_millis(100), "latency {:?}", latency);
    }
}

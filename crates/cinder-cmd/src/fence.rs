//! # Fence Tracking
//!
//! Submitted / retired timestamp pair with wrap-aware comparison and blocking
//! waits.
//!
//! `submitted` is advanced by the submission engine under the device lock.
//! `retired` is advanced only by the completion path, which may run on any
//! thread. Waiters sleep on a condition variable that every retire notifies.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cinder_core::{Error, Result, Timestamp};

// =============================================================================
// COMPARISON
// =============================================================================

/// Whether `target` has retired given the device's `retired` stamp
///
/// The gap is taken as a signed 32-bit delta. A retired stamp at or ahead of
/// the target counts as retired; so does one more than `epsilon` behind it,
/// which can only happen if the target was issued before a wrap that the
/// retired counter has already crossed.
#[inline]
pub const fn is_retired(retired: Timestamp, target: Timestamp, epsilon: u32) -> bool {
    let diff = retired.delta(target);
    diff >= 0 || diff < -(epsilon as i32)
}

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited stamp has retired
    Ready,
    /// The bound elapsed first
    TimedOut,
}

impl WaitOutcome {
    /// Whether the wait succeeded
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

// =============================================================================
// TRACKER
// =============================================================================

#[derive(Debug)]
struct Counters {
    submitted: Timestamp,
    retired: Timestamp,
    faulted: bool,
}

/// Submitted / retired counters of one device
#[derive(Debug)]
pub struct TimestampTracker {
    counters: Mutex<Counters>,
    retired_cv: Condvar,
    epsilon: u32,
}

impl TimestampTracker {
    /// Create a tracker with both counters at zero
    pub fn new(epsilon: u32) -> Self {
        Self {
            counters: Mutex::new(Counters {
                submitted: Timestamp::ZERO,
                retired: Timestamp::ZERO,
                faulted: false,
            }),
            retired_cv: Condvar::new(),
            epsilon,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last submitted stamp
    pub fn submitted(&self) -> Timestamp {
        self.lock().submitted
    }

    /// Last retired stamp
    pub fn retired(&self) -> Timestamp {
        self.lock().retired
    }

    /// Stamp the next submission will receive
    pub fn next_submitted(&self) -> Timestamp {
        self.lock().submitted.next()
    }

    /// Whether all submitted work has retired
    pub fn is_idle(&self) -> bool {
        let counters = self.lock();
        is_retired(counters.retired, counters.submitted, self.epsilon)
    }

    /// Whether `target` has retired
    pub fn is_retired(&self, target: Timestamp) -> bool {
        is_retired(self.lock().retired, target, self.epsilon)
    }

    /// Assign the next submitted stamp
    ///
    /// Fails with [`Error::HardwareFault`] once the device has faulted, so no
    /// stamp is handed out for work the hardware will never run.
    pub fn advance_submitted(&self) -> Result<Timestamp> {
        let mut counters = self.lock();
        if counters.faulted {
            return Err(Error::HardwareFault);
        }
        counters.submitted = counters.submitted.next();
        Ok(counters.submitted)
    }

    /// Move `retired` forward to `value` and wake waiters
    ///
    /// `retired` never moves backwards and never passes `submitted`; a value
    /// ahead of the last submission is clamped to it. Returns the new retired
    /// stamp.
    pub fn retire_up_to(&self, value: Timestamp) -> Timestamp {
        let mut counters = self.lock();

        let value = if value.delta(counters.submitted) > 0 {
            log::warn!(
                "fence: retire {} ahead of submitted {}, clamping",
                value,
                counters.submitted
            );
            counters.submitted
        } else {
            value
        };

        if value.delta(counters.retired) > 0 {
            counters.retired = value;
            self.retired_cv.notify_all();
        }

        counters.retired
    }

    /// Retire `count` more submissions
    pub fn retire_count(&self, count: u32) -> Timestamp {
        let target = self.retired().advance(count);
        self.retire_up_to(target)
    }

    /// Block until `target` retires or `timeout` elapses
    ///
    /// Returns [`Error::HardwareFault`] if the device faults while waiting;
    /// nothing will retire the target after that.
    pub fn wait(&self, target: Timestamp, timeout: Duration) -> Result<WaitOutcome> {
        let deadline = Instant::now().checked_add(timeout);
        let mut counters = self.lock();

        loop {
            if counters.faulted {
                return Err(Error::HardwareFault);
            }
            if is_retired(counters.retired, target, self.epsilon) {
                return Ok(WaitOutcome::Ready);
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                return Ok(WaitOutcome::TimedOut);
            }

            let (guard, _) = self
                .retired_cv
                .wait_timeout(counters, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            counters = guard;
        }
    }

    /// Fail every current and future wait until [`recover`](Self::recover)
    pub fn mark_faulted(&self) {
        self.lock().faulted = true;
        self.retired_cv.notify_all();
    }

    /// Whether the device is in the faulted state
    pub fn is_faulted(&self) -> bool {
        self.lock().faulted
    }

    /// Leave the faulted state, abandoning all outstanding work
    ///
    /// Outstanding stamps will never be retired by the hardware, so `retired`
    /// jumps to `submitted`. `submitted` itself keeps counting.
    pub fn recover(&self) {
        let mut counters = self.lock();
        counters.faulted = false;
        counters.retired = counters.submitted;
        self.retired_cv.notify_all();
    }

    /// Retire everything outstanding without leaving a fault
    ///
    /// Used when the ring is released under outstanding work. Returns how
    /// many stamps were abandoned.
    pub fn abandon_outstanding(&self) -> u32 {
        let mut counters = self.lock();
        let abandoned = counters.submitted.delta(counters.retired);
        if abandoned <= 0 {
            return 0;
        }
        counters.retired = counters.submitted;
        self.retired_cv.notify_all();
        abandoned as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const EPS: u32 = 20000;

    fn submitted(tracker: &TimestampTracker, count: u32) {
        for _ in 0..count {
            tracker.advance_submitted().unwrap();
        }
    }

    #[test]
    fn test_is_retired_plain() {
        assert!(is_retired(Timestamp::new(5), Timestamp::new(5), EPS));
        assert!(is_retired(Timestamp::new(6), Timestamp::new(5), EPS));
        assert!(!is_retired(Timestamp::new(4), Timestamp::new(5), EPS));
    }

    #[test]
    fn test_is_retired_across_wrap() {
        // retired wrapped past zero, target issued just before the wrap
        assert!(is_retired(Timestamp::new(3), Timestamp::new(u32::MAX - 2), EPS));
        // target issued just after the wrap, retired still before it
        assert!(!is_retired(Timestamp::new(u32::MAX - 2), Timestamp::new(3), EPS));
    }

    #[test]
    fn test_is_retired_epsilon_band() {
        let target = Timestamp::new(100_000);
        assert!(!is_retired(Timestamp::new(100_000 - EPS), target, EPS));
        assert!(is_retired(Timestamp::new(100_000 - EPS - 1), target, EPS));
    }

    #[test]
    fn test_advance_is_strictly_increasing() {
        let tracker = TimestampTracker::new(EPS);
        let a = tracker.advance_submitted().unwrap();
        let b = tracker.advance_submitted().unwrap();
        assert_eq!(a, Timestamp::new(1));
        assert_eq!(b, Timestamp::new(2));
        assert_eq!(tracker.next_submitted(), Timestamp::new(3));
    }

    #[test]
    fn test_advance_refused_while_faulted() {
        let tracker = TimestampTracker::new(EPS);
        submitted(&tracker, 1);
        tracker.mark_faulted();

        assert_eq!(tracker.advance_submitted(), Err(Error::HardwareFault));
        assert_eq!(tracker.submitted(), Timestamp::new(1));

        tracker.recover();
        assert_eq!(tracker.advance_submitted(), Ok(Timestamp::new(2)));
    }

    #[test]
    fn test_abandon_outstanding() {
        let tracker = TimestampTracker::new(EPS);
        assert_eq!(tracker.abandon_outstanding(), 0);

        submitted(&tracker, 3);
        tracker.retire_count(1);
        assert_eq!(tracker.abandon_outstanding(), 2);
        assert!(tracker.is_idle());
        assert!(!tracker.is_faulted());
        assert_eq!(tracker.retired(), Timestamp::new(3));
    }

    #[test]
    fn test_retire_clamps_to_submitted() {
        let tracker = TimestampTracker::new(EPS);
        submitted(&tracker, 2);

        assert_eq!(tracker.retire_up_to(Timestamp::new(7)), Timestamp::new(2));
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_retire_never_moves_backwards() {
        let tracker = TimestampTracker::new(EPS);
        submitted(&tracker, 4);
        tracker.retire_up_to(Timestamp::new(3));

        assert_eq!(tracker.retire_up_to(Timestamp::new(1)), Timestamp::new(3));
        assert_eq!(tracker.retire_count(1), Timestamp::new(4));
    }

    #[test]
    fn test_wait_ready_immediately() {
        let tracker = TimestampTracker::new(EPS);
        assert_eq!(
            tracker.wait(Timestamp::ZERO, Duration::ZERO),
            Ok(WaitOutcome::Ready)
        );
    }

    #[test]
    fn test_wait_times_out() {
        let tracker = TimestampTracker::new(EPS);
        submitted(&tracker, 1);

        let start = Instant::now();
        let outcome = tracker.wait(Timestamp::new(1), Duration::from_millis(30));

        assert_eq!(outcome, Ok(WaitOutcome::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_retire_wakes_waiter() {
        let tracker = Arc::new(TimestampTracker::new(EPS));
        submitted(&tracker, 3);

        let waiter = {
            let tracker = tracker.clone();
            thread::spawn(move || tracker.wait(Timestamp::new(3), Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        tracker.retire_count(1);
        tracker.retire_count(2);

        assert_eq!(waiter.join().unwrap(), Ok(WaitOutcome::Ready));
    }

    #[test]
    fn test_fault_fails_waiters_until_recovered() {
        let tracker = Arc::new(TimestampTracker::new(EPS));
        submitted(&tracker, 2);

        let waiter = {
            let tracker = tracker.clone();
            thread::spawn(move || tracker.wait(Timestamp::new(2), Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        tracker.mark_faulted();
        assert_eq!(waiter.join().unwrap(), Err(Error::HardwareFault));

        tracker.recover();
        assert!(!tracker.is_faulted());
        assert!(tracker.is_idle());
        assert_eq!(tracker.submitted(), Timestamp::new(2));
    }
}

//! [`Watchdog`] – control-loop liveness monitor.
//!
//! The control loop calls [`Watchdog::heartbeat`] once per tick.  A loop
//! that stops ticking (hung policy server, stuck physics step) is reported
//! as [`LoopHealth::Stalled`] once its deadline passes; a loop that died on
//! an error is [`LoopHealth::Faulted`] after [`Watchdog::trip`].  Only
//! [`LoopHealth::Alive`] counts as connected on the control surface.

use std::time::{Duration, Instant};

use tracing::error;

/// Lower bound on the stall deadline.
pub const MIN_DEADLINE: Duration = Duration::from_secs(1);

/// Number of missed periods tolerated before a loop counts as stalled.
pub const MISSED_PERIODS: u32 = 10;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health of the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopHealth {
    /// A heartbeat arrived within the deadline.
    Alive,
    /// No heartbeat within the deadline.
    Stalled,
    /// The loop ended on an error.
    Faulted(String),
    /// The loop ended after a stop request.
    Stopped,
}

impl LoopHealth {
    pub fn is_alive(&self) -> bool {
        matches!(self, LoopHealth::Alive)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use reach_kernel::watchdog::{LoopHealth, Watchdog};
///
/// let start = Instant::now();
/// let mut wd = Watchdog::new(start, Duration::from_secs(1));
/// wd.heartbeat(start + Duration::from_millis(500));
/// assert_eq!(wd.health(start + Duration::from_millis(900)), LoopHealth::Alive);
/// assert_eq!(wd.health(start + Duration::from_secs(2)), LoopHealth::Stalled);
/// ```
#[derive(Debug, Clone)]
pub struct Watchdog {
    last_heartbeat: Instant,
    deadline: Duration,
    fault: Option<String>,
    stopped: bool,
    beats: u64,
}

impl Watchdog {
    /// A watchdog whose deadline starts counting at `now`.
    pub fn new(now: Instant, deadline: Duration) -> Self {
        Self {
            last_heartbeat: now,
            deadline,
            fault: None,
            stopped: false,
            beats: 0,
        }
    }

    /// Deadline of `max(10 periods, 1 s)` for a loop running at `period`.
    pub fn for_period(now: Instant, period: Duration) -> Self {
        Self::new(now, (period * MISSED_PERIODS).max(MIN_DEADLINE))
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Record a tick.  Heartbeats after a fault or stop are ignored.
    pub fn heartbeat(&mut self, now: Instant) {
        if self.fault.is_some() || self.stopped {
            return;
        }
        self.last_heartbeat = self.last_heartbeat.max(now);
        self.beats += 1;
    }

    /// Mark the loop as dead because of `reason`.  The first reason sticks.
    pub fn trip(&mut self, reason: impl Into<String>) {
        if self.fault.is_none() {
            let reason = reason.into();
            error!(%reason, "control loop faulted");
            self.fault = Some(reason);
        }
    }

    pub fn mark_stopped(&mut self) {
        self.stopped = true;
    }

    pub fn beats(&self) -> u64 {
        self.beats
    }

    /// Health as of `now`.  A fault outranks a stop, which outranks a stall.
    pub fn health(&self, now: Instant) -> LoopHealth {
        if let Some(reason) = &self.fault {
            return LoopHealth::Faulted(reason.clone());
        }
        if self.stopped {
            return LoopHealth::Stopped;
        }
        if now.saturating_duration_since(self.last_heartbeat) <= self.deadline {
            LoopHealth::Alive
        } else {
            LoopHealth::Stalled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn fresh_loop_is_alive() {
        let now = Instant::now();
        let wd = Watchdog::new(now, ms(50));
        assert!(wd.health(now).is_alive());
        assert_eq!(wd.beats(), 0);
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let start = Instant::now();
        let mut wd = Watchdog::new(start, ms(20));
        wd.heartbeat(start + ms(15));
        assert_eq!(wd.health(start + ms(30)), LoopHealth::Alive);
        assert_eq!(wd.health(start + ms(40)), LoopHealth::Stalled);
        assert_eq!(wd.beats(), 1);
    }

    #[test]
    fn silent_loop_stalls_in_real_time() {
        let wd = Watchdog::new(Instant::now(), ms(20));
        thread::sleep(ms(30));
        assert_eq!(wd.health(Instant::now()), LoopHealth::Stalled);
    }

    #[test]
    fn deadline_scales_with_period_but_not_below_one_second() {
        let now = Instant::now();
        assert_eq!(Watchdog::for_period(now, ms(40)).deadline(), MIN_DEADLINE);
        assert_eq!(Watchdog::for_period(now, ms(250)).deadline(), ms(2500));
    }

    #[test]
    fn fault_outranks_everything_and_sticks() {
        let start = Instant::now();
        let mut wd = Watchdog::new(start, ms(20));
        wd.trip("policy server unreachable");
        wd.trip("second reason");
        wd.mark_stopped();
        wd.heartbeat(start + ms(1));
        assert_eq!(
            wd.health(start),
            LoopHealth::Faulted("policy server unreachable".into())
        );
        assert_eq!(wd.beats(), 0);
    }

    #[test]
    fn stopped_loop_is_not_alive() {
        let start = Instant::now();
        let mut wd = Watchdog::new(start, ms(20));
        wd.mark_stopped();
        assert_eq!(wd.health(start), LoopHealth::Stopped);
        assert!(!wd.health(start).is_alive());
    }
}

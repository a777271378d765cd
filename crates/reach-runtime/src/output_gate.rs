//! [`OutputGate`] – rate-limited forwarding of joint positions to the
//! physical actuator bus.
//!
//! The gate is a `governor` rate limiter with a burst of one, so two frames
//! are never sent closer together than the minimum interval (20 ms, a 50 Hz
//! ceiling).  The motor map is resolved against the simulation on first use
//! and cached.  The limiter is only consulted while output is active, so
//! toggling output off and on never queues a burst.

use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reach_hal::{ActuatorBus, MotorMap, Simulation};
use reach_types::ReachError;
use tracing::trace;

/// Minimum spacing between two frames on the actuator bus.
pub const MIN_SEND_INTERVAL: Duration = Duration::from_millis(20);

pub struct OutputGate<C: Clock = DefaultClock> {
    limiter: RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<C::Instant>>,
    map: MotorMap,
    resolved: Option<MotorMap>,
    sent: u64,
}

impl OutputGate<DefaultClock> {
    /// Gate on the monotonic system clock.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Configuration`] if `min_interval` is zero.
    pub fn new(map: MotorMap, min_interval: Duration) -> Result<Self, ReachError> {
        Self::with_clock(map, min_interval, DefaultClock::default())
    }
}

impl<C: Clock> OutputGate<C> {
    /// Gate on an explicit clock (a `FakeRelativeClock` in tests).
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Configuration`] if `min_interval` is zero.
    pub fn with_clock(map: MotorMap, min_interval: Duration, clock: C) -> Result<Self, ReachError> {
        let quota = Quota::with_period(min_interval).ok_or_else(|| {
            ReachError::Configuration("robot send interval must be greater than zero".into())
        })?;
        Ok(Self {
            limiter: RateLimiter::direct_with_clock(quota, clock),
            map,
            resolved: None,
            sent: 0,
        })
    }

    /// Frames sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Send the current joint positions if `robot_active` and the minimum
    /// interval has elapsed.  Returns `true` when a frame went out.
    pub fn maybe_send(
        &mut self,
        robot_active: bool,
        sim: &dyn Simulation,
        bus: &mut dyn ActuatorBus,
    ) -> bool {
        if !robot_active || self.limiter.check().is_err() {
            return false;
        }
        let map = self.resolved.get_or_insert_with(|| self.map.resolve(sim));
        let frame = map.sample(sim);
        trace!(motors = frame.len(), "robot frame");
        bus.send(&frame);
        self.sent += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use reach_hal::{ArmSide, SimArm, SimBus};

    fn gate(clock: &FakeRelativeClock) -> OutputGate<FakeRelativeClock> {
        OutputGate::with_clock(MotorMap::g1_arms(), MIN_SEND_INTERVAL, clock.clone()).unwrap()
    }

    #[test]
    fn five_ms_ticks_send_at_most_once_per_four_ticks() {
        let clock = FakeRelativeClock::default();
        let mut gate = gate(&clock);
        let sim = SimArm::new(ArmSide::Left);
        let mut bus = SimBus::new();
        let recorder = bus.recorder();

        let mut send_ticks = Vec::new();
        for tick in 0..40 {
            if gate.maybe_send(true, &sim, &mut bus) {
                send_ticks.push(tick);
            }
            clock.advance(Duration::from_millis(5));
        }

        assert_eq!(send_ticks[0], 0);
        assert!(send_ticks.windows(2).all(|w| w[1] - w[0] >= 4), "{send_ticks:?}");
        assert!(send_ticks.len() >= 8, "{send_ticks:?}");
        assert_eq!(recorder.frame_count(), send_ticks.len());
        assert_eq!(gate.sent(), send_ticks.len() as u64);
    }

    #[test]
    fn frames_carry_only_joints_the_model_has() {
        let clock = FakeRelativeClock::default();
        let mut gate = gate(&clock);
        let sim = SimArm::new(ArmSide::Right);
        let mut bus = SimBus::new();
        let recorder = bus.recorder();

        assert!(gate.maybe_send(true, &sim, &mut bus));
        let frame = &recorder.frames()[0];
        assert_eq!(frame.keys().copied().collect::<Vec<_>>(), (22..=28).collect::<Vec<u8>>());
        assert_eq!(frame[&25], sim.joint_position("right_elbow_joint").unwrap());
    }

    #[test]
    fn inactive_output_sends_nothing_and_keeps_the_budget() {
        let clock = FakeRelativeClock::default();
        let mut gate = gate(&clock);
        let sim = SimArm::new(ArmSide::Left);
        let mut bus = SimBus::new();

        for _ in 0..10 {
            assert!(!gate.maybe_send(false, &sim, &mut bus));
        }
        // The first active tick still goes out immediately.
        assert!(gate.maybe_send(true, &sim, &mut bus));
        assert!(!gate.maybe_send(true, &sim, &mut bus));
        assert_eq!(bus.recorder().frame_count(), 1);
    }

    #[test]
    fn zero_interval_is_a_configuration_error() {
        let result = OutputGate::new(MotorMap::g1_arms(), Duration::ZERO);
        assert!(matches!(result, Err(ReachError::Configuration(_))));
    }
}

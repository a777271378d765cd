//! Shared control state and the [`ControlHandle`] used by every external
//! surface.
//!
//! Goal, arbiter (override window and safety flags), output flags, stop
//! flag, tick counter and liveness all sit in one [`ControlState`] behind a
//! single mutex.  The control loop and the surfaces each take the lock only
//! for short reads and updates.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use reach_kernel::mode_arbiter::MANUAL_OVERRIDE;
use reach_kernel::{GoalStore, LoopHealth, ModeArbiter, SafetyState, Watchdog};
use reach_types::{Axis, Mode, ReachError, StatusSnapshot, Vec3};
use tracing::info;

/// Output enables as set by the control surface, plus the bus connectivity
/// last reported by the actuator bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputFlags {
    pub sim_enabled: bool,
    pub robot_enabled: bool,
    pub bus_connected: bool,
}

impl OutputFlags {
    /// Physical output is effective only while enabled *and* connected.
    pub fn robot_active(&self) -> bool {
        self.robot_enabled && self.bus_connected
    }

    /// `false` when neither sink would consume motion.
    pub fn any_active(&self) -> bool {
        self.sim_enabled || self.robot_active()
    }
}

/// Everything mutated from more than one thread.
#[derive(Debug)]
pub struct ControlState {
    pub(crate) goal: GoalStore,
    pub(crate) arbiter: ModeArbiter,
    pub(crate) outputs: OutputFlags,
    pub(crate) stop: bool,
    pub(crate) tick: u64,
    pub(crate) watchdog: Watchdog,
}

impl ControlState {
    pub(crate) fn snapshot(&self, now: Instant) -> StatusSnapshot {
        StatusSnapshot {
            goal: self.goal.peek_clamped().to_array(),
            mode: self.arbiter.mode().label().to_string(),
            out_sim: self.outputs.sim_enabled,
            out_robot: self.outputs.robot_active(),
            robot_ok: self.outputs.bus_connected,
            loop_alive: self.watchdog.health(now).is_alive(),
            tick: self.tick,
        }
    }
}

fn ensure_finite(value: f32, what: &str) -> Result<(), ReachError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ReachError::InvalidCommand(format!("{what} must be a finite number")))
    }
}

/// Cloneable handle onto the shared control state.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use reach_kernel::Watchdog;
/// use reach_runtime::shared::{ControlHandle, OutputFlags};
/// use reach_types::Vec3;
///
/// let now = Instant::now();
/// let handle = ControlHandle::new(
///     Vec3::new(0.2, 0.0, 0.8),
///     OutputFlags { sim_enabled: true, ..OutputFlags::default() },
///     Watchdog::new(now, Duration::from_secs(1)),
/// );
/// handle.set_goal(Vec3::new(0.3, 0.1, 0.9)).unwrap();
/// assert_eq!(handle.status().goal, [0.3, 0.1, 0.9]);
/// ```
#[derive(Clone, Debug)]
pub struct ControlHandle {
    state: Arc<Mutex<ControlState>>,
}

impl ControlHandle {
    pub fn new(initial_goal: Vec3, outputs: OutputFlags, watchdog: Watchdog) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControlState {
                goal: GoalStore::new(initial_goal),
                arbiter: ModeArbiter::new(),
                outputs,
                stop: false,
                tick: 0,
                watchdog,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the lock held.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ControlState) -> R) -> R {
        f(&mut self.lock())
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Set an absolute goal: store it raw, clear the collision interlock and
    /// force RUN for the manual override window.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::InvalidCommand`] for non-finite coordinates;
    /// nothing is changed in that case.
    pub fn set_goal(&self, goal: Vec3) -> Result<(), ReachError> {
        self.set_goal_at(Instant::now(), goal)
    }

    /// [`set_goal`](Self::set_goal) with an explicit timestamp.
    pub fn set_goal_at(&self, now: Instant, goal: Vec3) -> Result<(), ReachError> {
        if !goal.is_finite() {
            return Err(ReachError::InvalidCommand(
                "goal coordinates must be finite numbers".into(),
            ));
        }
        let mut state = self.lock();
        state.goal.set(goal);
        state.arbiter.clear_interlock();
        state.arbiter.arm_override(now, MANUAL_OVERRIDE);
        Ok(())
    }

    /// Move one axis of the clamped goal.  Safety flags and the override
    /// window are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::InvalidCommand`] for a non-finite `delta`.
    pub fn nudge(&self, axis: Axis, delta: f32) -> Result<(), ReachError> {
        ensure_finite(delta, "nudge delta")?;
        self.lock().goal.nudge(axis, delta);
        Ok(())
    }

    /// Force-clear hold and the collision interlock, and force RUN for the
    /// manual override window.
    pub fn go(&self) {
        self.go_at(Instant::now());
    }

    pub fn go_at(&self, now: Instant) {
        let mut state = self.lock();
        state.arbiter.clear_interlock();
        state.arbiter.arm_override(now, MANUAL_OVERRIDE);
        info!("go: interlock cleared");
    }

    /// Enable or disable physical output.  Returns the resulting flags.
    pub fn set_robot_output(&self, enabled: bool) -> OutputFlags {
        let mut state = self.lock();
        state.outputs.robot_enabled = enabled;
        info!(enabled, connected = state.outputs.bus_connected, "robot output toggled");
        state.outputs
    }

    /// Enable or disable simulation output.  Returns the resulting flags.
    pub fn set_sim_output(&self, enabled: bool) -> OutputFlags {
        let mut state = self.lock();
        state.outputs.sim_enabled = enabled;
        info!(enabled, "sim output toggled");
        state.outputs
    }

    /// Ask the control loop to finish after its current tick.
    pub fn request_stop(&self) {
        self.lock().stop = true;
    }

    // -----------------------------------------------------------------------
    // Queries (pure reads)
    // -----------------------------------------------------------------------

    pub fn is_stop_requested(&self) -> bool {
        self.lock().stop
    }

    /// Goal, mode label, output flags, bus connectivity and liveness.
    pub fn status(&self) -> StatusSnapshot {
        self.lock().snapshot(Instant::now())
    }

    pub fn goal(&self) -> Vec3 {
        self.lock().goal.peek_clamped()
    }

    pub fn mode(&self) -> Mode {
        self.lock().arbiter.mode()
    }

    pub fn safety_state(&self) -> SafetyState {
        self.lock().arbiter.state()
    }

    pub fn outputs(&self) -> OutputFlags {
        self.lock().outputs
    }

    pub fn health(&self) -> LoopHealth {
        self.lock().watchdog.health(Instant::now())
    }

    pub fn tick_count(&self) -> u64 {
        self.lock().tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle() -> ControlHandle {
        ControlHandle::new(
            Vec3::new(0.2, 0.0, 0.8),
            OutputFlags {
                sim_enabled: true,
                robot_enabled: false,
                bus_connected: true,
            },
            Watchdog::new(Instant::now(), Duration::from_secs(1)),
        )
    }

    #[test]
    fn set_goal_clears_interlock_and_arms_override() {
        let h = handle();
        let now = Instant::now();
        h.with_state(|s| {
            s.arbiter.decide(now, true, Some(0.3));
        });
        assert_eq!(h.mode(), Mode::Collision);

        h.set_goal_at(now, Vec3::new(0.3, 0.1, 0.9)).unwrap();
        assert_eq!(h.safety_state(), SafetyState::default());
        let window = h.with_state(|s| s.arbiter.override_window());
        assert!(window.is_active(now + Duration::from_millis(499)));
        assert!(!window.is_active(now + MANUAL_OVERRIDE));
    }

    #[test]
    fn non_finite_goal_is_rejected_without_side_effects() {
        let h = handle();
        let err = h.set_goal(Vec3::new(f32::NAN, 0.0, 0.8)).unwrap_err();
        assert!(matches!(err, ReachError::InvalidCommand(_)));
        assert_eq!(h.goal(), Vec3::new(0.2, 0.0, 0.8));
        assert_eq!(h.mode(), Mode::Hold);
        assert!(h.nudge(Axis::X, f32::INFINITY).is_err());
    }

    #[test]
    fn nudge_leaves_flags_alone() {
        let h = handle();
        h.nudge(Axis::Z, 0.1).unwrap();
        assert!((h.goal().z - 0.9).abs() < 1e-6);
        assert_eq!(h.mode(), Mode::Hold);
        assert!(h.with_state(|s| s.arbiter.override_window().until().is_none()));
    }

    #[test]
    fn robot_output_requires_connectivity() {
        let h = handle();
        assert!(h.set_robot_output(true).robot_active());
        assert!(h.status().out_robot);

        h.with_state(|s| s.outputs.bus_connected = false);
        let status = h.status();
        assert!(!status.out_robot);
        assert!(!status.robot_ok);
        // The request itself is remembered.
        assert!(h.outputs().robot_enabled);
    }

    #[test]
    fn status_is_a_pure_read() {
        let h = handle();
        h.with_state(|s| s.goal.set(Vec3::new(9.0, 0.0, 0.8)));
        let status = h.status();
        assert_eq!(status.goal, [0.6, 0.0, 0.8]);
        assert_eq!(status.mode, "HOLD");
        assert!(status.loop_alive);
        // Raw goal untouched by the query.
        assert_eq!(h.with_state(|s| s.goal.raw()), Vec3::new(9.0, 0.0, 0.8));
    }

    #[test]
    fn any_active_covers_both_sinks() {
        let mut flags = OutputFlags::default();
        assert!(!flags.any_active());
        flags.robot_enabled = true;
        assert!(!flags.any_active());
        flags.bus_connected = true;
        assert!(flags.any_active());
        flags = OutputFlags {
            sim_enabled: true,
            ..OutputFlags::default()
        };
        assert!(flags.any_active());
    }

    #[test]
    fn stop_flag_round_trip() {
        let h = handle();
        let other = h.clone();
        assert!(!h.is_stop_requested());
        other.request_stop();
        assert!(h.is_stop_requested());
    }
}

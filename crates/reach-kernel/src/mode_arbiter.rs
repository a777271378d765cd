//! [`ModeArbiter`] – decides each tick whether the arm runs the policy or
//! holds still.
//!
//! Rules, in precedence order:
//!
//! 1. A collision this tick latches `collision_freeze`.
//! 2. While frozen the mode is [`Mode::Collision`] (a sub-state of hold).
//! 3. Otherwise distance hysteresis: enter hold below
//!    [`HOLD_ENTER_DISTANCE`], leave it above [`HOLD_EXIT_DISTANCE`].
//! 4. Inside the manual override window the mode is [`Mode::Run`] and both
//!    flags are cleared, whatever rules 1–3 decided.
//!
//! Distance recovery never clears the freeze: rule 3 is only evaluated
//! while unfrozen, so the interlock is released exclusively by an explicit
//! command ([`ModeArbiter::clear_interlock`]) or by the override window.

use std::time::{Duration, Instant};

use reach_types::Mode;
use tracing::{debug, warn};

/// Distance to goal (metres) below which a running arm enters hold.
pub const HOLD_ENTER_DISTANCE: f32 = 0.03;

/// Distance to goal (metres) above which a holding arm resumes.
pub const HOLD_EXIT_DISTANCE: f32 = 0.05;

/// How long a goal-set or go command forces RUN.
pub const MANUAL_OVERRIDE: Duration = Duration::from_millis(500);

// ────────────────────────────────────────────────────────────────────────────
// Override window
// ────────────────────────────────────────────────────────────────────────────

/// "Treat as a manual command until T".  Only ever extended forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideWindow {
    until: Option<Instant>,
}

impl OverrideWindow {
    /// Push the deadline to `now + duration` unless it is already later.
    pub fn extend(&mut self, now: Instant, duration: Duration) {
        let candidate = now + duration;
        if self.until.is_none_or(|until| candidate > until) {
            self.until = Some(candidate);
        }
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now < until)
    }

    pub fn until(&self) -> Option<Instant> {
        self.until
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Arbiter
// ────────────────────────────────────────────────────────────────────────────

/// The two safety flags.  `collision_freeze` implies `hold_mode` after every
/// [`ModeArbiter::decide`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyState {
    pub collision_freeze: bool,
    pub hold_mode: bool,
}

/// RUN / HOLD / COLLISION state machine.
///
/// # Example
///
/// ```
/// use std::time::Instant;
/// use reach_kernel::mode_arbiter::ModeArbiter;
/// use reach_types::Mode;
///
/// let mut arbiter = ModeArbiter::new();
/// let now = Instant::now();
/// assert_eq!(arbiter.mode(), Mode::Hold);
/// assert_eq!(arbiter.decide(now, false, Some(0.2)), Mode::Run);
/// assert_eq!(arbiter.decide(now, true, Some(0.2)), Mode::Collision);
/// ```
#[derive(Debug, Clone)]
pub struct ModeArbiter {
    state: SafetyState,
    window: OverrideWindow,
    mode: Mode,
}

impl Default for ModeArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeArbiter {
    /// Starts in HOLD.
    pub fn new() -> Self {
        Self {
            state: SafetyState {
                collision_freeze: false,
                hold_mode: true,
            },
            window: OverrideWindow::default(),
            mode: Mode::Hold,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    pub fn override_window(&self) -> OverrideWindow {
        self.window
    }

    /// Drop both flags.  Used by goal-set and go commands.
    pub fn clear_interlock(&mut self) {
        if self.state.collision_freeze {
            debug!("collision interlock cleared by command");
        }
        self.state = SafetyState::default();
        self.mode = Mode::Run;
    }

    /// Force RUN until at least `now + duration`.
    pub fn arm_override(&mut self, now: Instant, duration: Duration) {
        self.window.extend(now, duration);
    }

    /// Classify this tick.
    ///
    /// `distance` is the end-effector distance to the clamped goal, or
    /// `None` when the simulation has no forward kinematics (rule 3 is then
    /// skipped).
    pub fn decide(&mut self, now: Instant, collided: bool, distance: Option<f32>) -> Mode {
        if collided && !self.state.collision_freeze {
            warn!("collision detected, freezing arm");
        }
        if collided {
            self.state.collision_freeze = true;
        }

        if self.state.collision_freeze {
            self.state.hold_mode = true;
        } else if let Some(d) = distance {
            if !self.state.hold_mode && d < HOLD_ENTER_DISTANCE {
                self.state.hold_mode = true;
            } else if self.state.hold_mode && d > HOLD_EXIT_DISTANCE {
                self.state.hold_mode = false;
            }
        }

        if self.window.is_active(now) {
            self.state = SafetyState::default();
        }

        self.mode = match self.state {
            SafetyState {
                collision_freeze: true,
                ..
            } => Mode::Collision,
            SafetyState { hold_mode: true, .. } => Mode::Hold,
            _ => Mode::Run,
        };
        self.mode
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

//! [`GoalStore`] – the Cartesian target the arm is driven toward.
//!
//! Writes are stored raw; the value is clamped into the [`Workspace`] when
//! the control loop reads it, and the clamped value is written back so
//! repeated reads are idempotent.  Out-of-range input is never rejected.
//!
//! The store itself does not know about the safety interlock or the manual
//! override window.  A goal-set from the control surface must also clear
//! the interlock and arm the override; `reach-runtime` does all three under
//! one lock.

use reach_types::{Axis, Vec3};
use tracing::debug;

/// Axis-aligned box of reachable goals, in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Workspace {
    pub low: Vec3,
    pub high: Vec3,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            low: Vec3::new(-0.1, -0.6, 0.4),
            high: Vec3::new(0.6, 0.6, 1.4),
        }
    }
}

impl Workspace {
    pub fn clamp(&self, p: Vec3) -> Vec3 {
        p.clamp(self.low, self.high)
    }

    pub fn contains(&self, p: Vec3) -> bool {
        self.clamp(p) == p
    }
}

/// Mutable goal with workspace clamping.
///
/// # Example
///
/// ```
/// use reach_kernel::goal_store::GoalStore;
/// use reach_types::Vec3;
///
/// let mut store = GoalStore::new(Vec3::new(0.2, 0.0, 0.8));
/// store.set(Vec3::new(5.0, 0.0, 0.8));
/// assert_eq!(store.read_clamped(), Vec3::new(0.6, 0.0, 0.8));
/// ```
#[derive(Debug, Clone)]
pub struct GoalStore {
    goal: Vec3,
    workspace: Workspace,
}

impl GoalStore {
    /// Store seeded with `initial` (typically the arm's current end
    /// effector) and the default workspace.
    pub fn new(initial: Vec3) -> Self {
        Self::with_workspace(initial, Workspace::default())
    }

    pub fn with_workspace(initial: Vec3, workspace: Workspace) -> Self {
        Self {
            goal: initial,
            workspace,
        }
    }

    /// Overwrite the goal with a raw point.
    pub fn set(&mut self, goal: Vec3) {
        debug!(x = goal.x, y = goal.y, z = goal.z, "goal set");
        self.goal = goal;
    }

    /// Move one axis of the clamped goal by `delta`.
    pub fn nudge(&mut self, axis: Axis, delta: f32) {
        let current = self.workspace.clamp(self.goal);
        self.goal = current.with(axis, current.get(axis) + delta);
        debug!(%axis, delta, "goal nudged");
    }

    /// Clamp the goal into the workspace, persist the clamped value and
    /// return it.
    pub fn read_clamped(&mut self) -> Vec3 {
        self.goal = self.workspace.clamp(self.goal);
        self.goal
    }

    /// The clamped goal without writing it back; used by status queries,
    /// which must not mutate state.
    pub fn peek_clamped(&self) -> Vec3 {
        self.workspace.clamp(self.goal)
    }

    /// The goal exactly as last written.
    pub fn raw(&self) -> Vec3 {
        self.goal
    }
}

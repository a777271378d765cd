//! Startup pose sequencer.
//!
//! Walks the arm through a fixed list of goals, one every `dwell`, using the
//! same [`ControlHandle::set_goal`] path as the control surface (so every
//! pose clears the interlock and arms the override window).  Stops early
//! when a stop is requested.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use reach_types::{ReachError, Vec3};
use tracing::info;

use crate::shared::ControlHandle;

/// Initial position, two lateral moves and a picking pose.
pub const DEFAULT_POSES: [Vec3; 5] = [
    Vec3::new(0.297, 0.152, 0.888),
    Vec3::new(0.297, 0.172, 0.988),
    Vec3::new(0.297, 0.132, 1.008),
    Vec3::new(0.297, 0.092, 1.008),
    Vec3::new(0.297, 0.112, 0.728),
];

pub const DEFAULT_DWELL: Duration = Duration::from_secs(1);

/// Granularity at which a dwelling sequence notices a stop request.
const STOP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct StartupSequence {
    poses: Vec<Vec3>,
    dwell: Duration,
}

impl Default for StartupSequence {
    fn default() -> Self {
        Self::new(DEFAULT_POSES.to_vec(), DEFAULT_DWELL)
    }
}

impl StartupSequence {
    pub fn new(poses: Vec<Vec3>, dwell: Duration) -> Self {
        Self { poses, dwell }
    }

    pub fn poses(&self) -> &[Vec3] {
        &self.poses
    }

    /// Apply every pose, waiting `dwell` after each.  Returns how many poses
    /// were applied before the sequence finished or a stop was requested.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::InvalidCommand`] if a pose is not finite.
    pub fn run(&self, handle: &ControlHandle) -> Result<usize, ReachError> {
        for (applied, pose) in self.poses.iter().enumerate() {
            if handle.is_stop_requested() {
                return Ok(applied);
            }
            info!(x = pose.x, y = pose.y, z = pose.z, "startup: setting goal");
            handle.set_goal(*pose)?;
            if !sleep_unless_stopped(handle, self.dwell) {
                return Ok(applied + 1);
            }
        }
        Ok(self.poses.len())
    }

    /// Run on a background thread named `startup-poses`.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Configuration`] if the thread cannot be spawned.
    pub fn spawn(
        self,
        handle: ControlHandle,
    ) -> Result<JoinHandle<Result<usize, ReachError>>, ReachError> {
        thread::Builder::new()
            .name("startup-poses".into())
            .spawn(move || self.run(&handle))
            .map_err(|e| ReachError::Configuration(format!("cannot spawn startup sequencer: {e}")))
    }
}

/// Sleep for `total`, waking early on a stop request.  Returns `false` if
/// stopped.
fn sleep_unless_stopped(handle: &ControlHandle, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if handle.is_stop_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(STOP_POLL.min(deadline - now));
    }
}

//! Generic `ActuatorBus` trait for the physical robot's joint-command bus.
//!
//! The supervisor only ever talks to this trait: a connectivity flag and a
//! fire-and-forget `send`.  Transport details (DDS domain, network
//! interface, message layout) belong to the implementation.

use std::collections::BTreeMap;

/// Joint-position targets keyed by the robot's logical motor index, in
/// radians.
pub type JointTargets = BTreeMap<u8, f32>;

/// Outbound command channel to the physical robot.
pub trait ActuatorBus: Send {
    /// `true` when the bus initialised successfully and can accept frames.
    ///
    /// The control surface reports this as `robot_ok`; physical output is
    /// only effective while it holds.
    fn connected(&self) -> bool;

    /// Publish one frame of joint targets.
    ///
    /// Delivery is best-effort.  Implementations must not block the control
    /// loop and must swallow transport errors (logging them is fine).
    fn send(&mut self, targets: &JointTargets);
}

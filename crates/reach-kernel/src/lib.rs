//! `reach-kernel` – Safety & Arbitration
//!
//! The rule-enforcing core of the arm supervisor.  Nothing here touches a
//! simulation, a policy or a bus; every type is a plain state machine that
//! can be driven tick by tick from a test.
//!
//! # Modules
//!
//! - [`goal_store`] – [`GoalStore`][goal_store::GoalStore]: the mutable
//!   Cartesian target, clamped into the reachable [`Workspace`] on every
//!   read.
//! - [`safety_monitor`] – [`SafetyMonitor`][safety_monitor::SafetyMonitor]:
//!   scans the simulation's contact list for arm-versus-protected-body
//!   penetration and reports `NoData`, `Clean` or `Collided`.
//! - [`mode_arbiter`] – [`ModeArbiter`][mode_arbiter::ModeArbiter]: the
//!   RUN / HOLD / COLLISION state machine with distance hysteresis, a sticky
//!   collision interlock and a time-boxed manual override.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: liveness of the
//!   control loop, so the control surface can report a stalled or faulted
//!   loop as disconnected.

pub mod goal_store;
pub mod mode_arbiter;
pub mod safety_monitor;
pub mod watchdog;

pub use goal_store::{GoalStore, Workspace};
pub use mode_arbiter::{ModeArbiter, OverrideWindow, SafetyState};
pub use safety_monitor::{SafetyMonitor, SafetyReading};
pub use watchdog::{LoopHealth, Watchdog};

//! `reach-runtime` – the fixed-period control loop and everything it drives.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: the
//!   periodic driver.  Reads the goal, scans contacts, lets the mode arbiter
//!   decide, steps the simulation and gates physical output, in that order,
//!   every tick.
//! - [`motion_stepper`] – [`MotionStepper`][motion_stepper::MotionStepper]:
//!   one simulation step per tick, policy-driven in RUN, zero-action in
//!   HOLD/COLL, with episode restarts from the last safe configuration.
//! - [`output_gate`] – [`OutputGate`][output_gate::OutputGate]:
//!   rate-limited forwarding of joint positions to the actuator bus.
//! - [`shared`] – [`ControlHandle`][shared::ControlHandle]: the cloneable
//!   handle every control surface uses to command the loop and read status.
//! - [`sequencer`] – [`StartupSequence`][sequencer::StartupSequence]: an
//!   optional walk through preset goals at startup.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP span export.
//!
//! # Locking
//!
//! All cross-thread state lives behind the one mutex inside
//! [`ControlHandle`].  The loop never holds it while stepping the
//! simulation or querying the policy.

pub mod control_loop;
pub mod motion_stepper;
pub mod output_gate;
pub mod sequencer;
pub mod shared;
pub mod telemetry;

pub use control_loop::{ControlLoop, ControlLoopConfig, LoopStats};
pub use motion_stepper::{EpisodeReset, MotionStepper, StepKind, StepReport};
pub use output_gate::OutputGate;
pub use sequencer::StartupSequence;
pub use shared::{ControlHandle, OutputFlags};
pub use telemetry::{TracerProviderGuard, init_tracing};

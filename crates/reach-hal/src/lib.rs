//! `reach-hal` – collaborator boundary of the arm supervisor.
//!
//! The control loop never talks to a physics engine, a trained network or a
//! motor bus directly.  It talks to the traits in this crate, so the headless
//! simulation used in tests and CI can be swapped for a real engine without
//! touching the supervisor.
//!
//! # Modules
//!
//! - [`simulation`] – [`Simulation`]: reset/step contract, goal slot, joint
//!   and contact state, forward kinematics, snapshot/restore.
//! - [`policy`] – [`Policy`] plus three implementations:
//!   [`ReachingPolicy`] (built-in), [`LinearPolicy`] (weights loaded from a
//!   JSON model file) and [`HttpPolicy`] (remote inference server).
//! - [`actuator`] – [`ActuatorBus`]: connectivity flag and fire-and-forget
//!   joint-target frames.
//! - [`motor_map`] – [`MotorMap`]: logical motor index → joint name.
//! - [`kinematics`] – [`ArmModel`]: 7-joint arm forward kinematics and
//!   Jacobian.
//! - [`sim`] – [`SimArm`], [`SimBus`], [`NullBus`]: in-process stand-ins for
//!   headless runs.

pub mod actuator;
pub mod kinematics;
pub mod motor_map;
pub mod policy;
pub mod sim;
pub mod simulation;

pub use actuator::{ActuatorBus, JointTargets};
pub use kinematics::{ARM_DOF, ArmModel, ArmSide, JOINT_SUFFIXES, LinkPoints};
pub use motor_map::MotorMap;
pub use policy::{HttpPolicy, LinearPolicy, Policy, PolicyLoadError, ReachingPolicy};
pub use sim::{BusRecorder, NullBus, Obstacle, SimArm, SimBus};
pub use simulation::Simulation;

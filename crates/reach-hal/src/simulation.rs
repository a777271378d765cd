//! The `Simulation` trait: everything the control loop needs from a physics
//! engine wrapped as a reinforcement-learning style environment.
//!
//! Two capabilities are optional because not every engine exposes them:
//! forward kinematics ([`Simulation::end_effector`]) and contact state
//! ([`Simulation::contacts`] / [`Simulation::collision_groups`]).  Their
//! default implementations return `None`, and the supervisor degrades
//! gracefully: no end effector means the loop never auto-holds, no contacts
//! means collision safety is disabled.

use reach_types::{Contact, CollisionGroups, JointConfiguration, Observation, ReachError, StepOutcome, Vec3};

/// A goal-conditioned arm simulation.
pub trait Simulation: Send {
    /// Start a new episode and return its first observation.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Simulation`] if the engine cannot reset (for
    /// example because it was closed).
    fn reset(&mut self) -> Result<Observation, ReachError>;

    /// Apply `action` for one physics step.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Simulation`] if the action has the wrong length
    /// or the engine has been closed.
    fn step(&mut self, action: &[f32]) -> Result<StepOutcome, ReachError>;

    /// Observation for the current state without stepping.
    fn observe(&self) -> Observation;

    /// Length of the action vector [`step`](Simulation::step) expects.
    fn action_dim(&self) -> usize;

    /// Overwrite the goal the episode is conditioned on.
    fn set_goal(&mut self, goal: Vec3);

    fn goal(&self) -> Vec3;

    /// World position of the end effector, if the engine exposes forward
    /// kinematics.
    fn end_effector(&self) -> Option<Vec3> {
        None
    }

    /// Contacts produced by the last step, if the engine exposes them.
    fn contacts(&self) -> Option<Vec<Contact>> {
        None
    }

    /// Arm and protected geometry ids, if the engine exposes them.
    fn collision_groups(&self) -> Option<CollisionGroups> {
        None
    }

    /// Snapshot of joint positions and velocities.
    fn configuration(&self) -> JointConfiguration;

    /// Write `config.qpos` back, zero all velocities and recompute derived
    /// kinematic state so the next observation reflects the restored pose.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Simulation`] when the snapshot does not match
    /// the model's joint count.
    fn restore(&mut self, config: &JointConfiguration) -> Result<(), ReachError>;

    /// Reset the episode step counter so a hold never runs into the
    /// episode time limit.
    fn reset_step_counter(&mut self);

    /// Current position of the named joint, or `None` if the model has no
    /// joint by that name.
    fn joint_position(&self, joint: &str) -> Option<f32>;

    /// Release engine resources.  Subsequent `reset`/`step` calls fail.
    fn close(&mut self);
}

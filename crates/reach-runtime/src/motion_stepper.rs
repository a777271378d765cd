//! [`MotionStepper`] – one physics step per tick, policy-driven or held.
//!
//! - Holding (mode HOLD/COLLISION, or no output sink enabled): a zero
//!   action is stepped and the simulation's policy step counter is reset,
//!   so the policy never sees stale trajectory context when it resumes.
//! - Running: the policy is queried deterministically on the current
//!   observation and its action is stepped.  After a step whose pre-step
//!   scan was clean the joint configuration becomes the new
//!   last-safe snapshot.
//! - When a policy step ends the episode, the simulation is reset, the
//!   last-safe snapshot (if any) is restored over the default pose, and the
//!   current goal is re-applied.
//!
//! Errors from the policy or the simulation are returned unchanged; the
//! caller treats them as fatal.

use reach_hal::{Policy, Simulation};
use reach_types::{JointConfiguration, Mode, ReachError, Vec3};
use tracing::{debug, info};

/// What the stepper did this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Policy,
    Hold,
}

/// An episode ended and was reset during this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeReset {
    /// `true` when the last-safe snapshot replaced the default reset pose.
    pub restored_safe_pose: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub kind: StepKind,
    pub reward: f32,
    pub reset: Option<EpisodeReset>,
}

/// Owns the last known-safe joint configuration.
#[derive(Debug, Default)]
pub struct MotionStepper {
    last_safe: Option<JointConfiguration>,
}

impl MotionStepper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the first episode.
    ///
    /// # Errors
    ///
    /// Propagates the simulation's reset error.
    pub fn prime(sim: &mut dyn Simulation) -> Result<Self, ReachError> {
        sim.reset()?;
        Ok(Self::new())
    }

    pub fn last_safe(&self) -> Option<&JointConfiguration> {
        self.last_safe.as_ref()
    }

    /// Advance the simulation by one step for `mode`.
    ///
    /// `outputs_active` is `false` when both sinks are disabled; `collided`
    /// is this tick's safety scan; `goal` is the clamped goal applied at the
    /// top of the tick.
    ///
    /// # Errors
    ///
    /// Any [`ReachError`] from `policy.predict`, `sim.step`, `sim.reset` or
    /// `sim.restore`.
    pub fn step(
        &mut self,
        sim: &mut dyn Simulation,
        policy: &dyn Policy,
        mode: Mode,
        outputs_active: bool,
        collided: bool,
        goal: Vec3,
    ) -> Result<StepReport, ReachError> {
        if mode.is_holding() || !outputs_active {
            let zero = vec![0.0; sim.action_dim()];
            let outcome = sim.step(&zero)?;
            sim.reset_step_counter();
            return Ok(StepReport {
                kind: StepKind::Hold,
                reward: outcome.reward,
                reset: None,
            });
        }

        let observation = sim.observe();
        let action = policy.predict(&observation, true)?;
        let outcome = sim.step(&action)?;
        if !collided {
            self.last_safe = Some(sim.configuration());
        }

        let reset = if outcome.episode_over() {
            Some(self.restart_episode(sim, goal)?)
        } else {
            None
        };

        Ok(StepReport {
            kind: StepKind::Policy,
            reward: outcome.reward,
            reset,
        })
    }

    fn restart_episode(
        &self,
        sim: &mut dyn Simulation,
        goal: Vec3,
    ) -> Result<EpisodeReset, ReachError> {
        sim.reset()?;
        let restored_safe_pose = match &self.last_safe {
            Some(safe) => {
                sim.restore(safe)?;
                true
            }
            None => false,
        };
        sim.set_goal(goal);
        if restored_safe_pose {
            info!("episode ended; resumed from last safe configuration");
        } else {
            debug!("episode ended before any safe configuration was captured");
        }
        Ok(EpisodeReset { restored_safe_pose })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use reach_types::{Observation, StepOutcome};

    /// Scripted one-joint simulation: each step adds the action to `q`, and
    /// the episode terminates on the step listed in `terminate_on`.
    #[derive(Default)]
    struct ScriptedSim {
        q: f32,
        steps: u32,
        step_counter_resets: u32,
        resets: u32,
        terminate_on: Option<u32>,
        goal: Vec3,
    }

    impl Simulation for ScriptedSim {
        fn reset(&mut self) -> Result<Observation, ReachError> {
            self.resets += 1;
            self.q = -9.0;
            Ok(self.observe())
        }

        fn step(&mut self, action: &[f32]) -> Result<StepOutcome, ReachError> {
            self.q += action[0];
            self.steps += 1;
            Ok(StepOutcome {
                observation: self.observe(),
                reward: 0.0,
                terminated: self.terminate_on == Some(self.steps),
                truncated: false,
            })
        }

        fn observe(&self) -> Observation {
            vec![self.q]
        }

        fn action_dim(&self) -> usize {
            1
        }

        fn set_goal(&mut self, goal: Vec3) {
            self.goal = goal;
        }

        fn goal(&self) -> Vec3 {
            self.goal
        }

        fn configuration(&self) -> JointConfiguration {
            JointConfiguration {
                qpos: vec![self.q],
                qvel: vec![1.0],
            }
        }

        fn restore(&mut self, config: &JointConfiguration) -> Result<(), ReachError> {
            self.q = config.qpos[0];
            Ok(())
        }

        fn reset_step_counter(&mut self) {
            self.step_counter_resets += 1;
        }

        fn joint_position(&self, _joint: &str) -> Option<f32> {
            Some(self.q)
        }

        fn close(&mut self) {}
    }

    /// Always pushes the joint by +1 and records what it saw.
    #[derive(Default)]
    struct PlusOne {
        seen: Arc<Mutex<Vec<Observation>>>,
    }

    impl Policy for PlusOne {
        fn predict(&self, observation: &[f32], deterministic: bool) -> Result<Vec<f32>, ReachError> {
            assert!(deterministic);
            self.seen.lock().unwrap().push(observation.to_vec());
            Ok(vec![1.0])
        }
    }

    struct Failing;

    impl Policy for Failing {
        fn predict(&self, _: &[f32], _: bool) -> Result<Vec<f32>, ReachError> {
            Err(ReachError::Policy("inference server down".into()))
        }
    }

    const GOAL: Vec3 = Vec3::new(0.3, 0.1, 0.9);

    #[test]
    fn hold_steps_zero_action_and_resets_counter() {
        let mut sim = ScriptedSim::default();
        let policy = PlusOne::default();
        let mut stepper = MotionStepper::new();

        let report = stepper.step(&mut sim, &policy, Mode::Hold, true, false, GOAL).unwrap();
        assert_eq!(report.kind, StepKind::Hold);
        assert_eq!(sim.q, 0.0);
        assert_eq!(sim.steps, 1);
        assert_eq!(sim.step_counter_resets, 1);
        assert!(policy.seen.lock().unwrap().is_empty());
        assert!(stepper.last_safe().is_none());
    }

    #[test]
    fn disabled_outputs_hold_even_in_run() {
        let mut sim = ScriptedSim::default();
        let policy = PlusOne::default();
        let mut stepper = MotionStepper::new();
        let report = stepper.step(&mut sim, &policy, Mode::Run, false, false, GOAL).unwrap();
        assert_eq!(report.kind, StepKind::Hold);
        assert_eq!(sim.q, 0.0);
    }

    #[test]
    fn run_queries_policy_on_the_current_observation() {
        let mut sim = ScriptedSim::default();
        let policy = PlusOne::default();
        let mut stepper = MotionStepper::new();
        sim.q = 2.0;
        stepper.step(&mut sim, &policy, Mode::Run, true, false, GOAL).unwrap();
        assert_eq!(policy.seen.lock().unwrap().as_slice(), &[vec![2.0_f32]]);
        assert_eq!(sim.q, 3.0);
        assert_eq!(stepper.last_safe().unwrap().qpos, vec![3.0]);
    }

    #[test]
    fn termination_rolls_back_to_last_clean_configuration() {
        // Three clean steps, then a collided step that ends the episode.
        let mut sim = ScriptedSim {
            terminate_on: Some(4),
            ..ScriptedSim::default()
        };
        let policy = PlusOne::default();
        let mut stepper = MotionStepper::new();

        for _ in 0..3 {
            let report = stepper.step(&mut sim, &policy, Mode::Run, true, false, GOAL).unwrap();
            assert!(report.reset.is_none());
        }
        assert_eq!(stepper.last_safe().unwrap().qpos, vec![3.0]);

        let report = stepper.step(&mut sim, &policy, Mode::Run, true, true, GOAL).unwrap();
        assert_eq!(
            report.reset,
            Some(EpisodeReset {
                restored_safe_pose: true
            })
        );
        assert_eq!(sim.resets, 1);
        // Not the reset pose (-9) and not the collided pose (4).
        assert_eq!(sim.q, 3.0);
        assert_eq!(sim.goal, GOAL);
    }

    #[test]
    fn termination_without_snapshot_keeps_reset_pose() {
        let mut sim = ScriptedSim {
            terminate_on: Some(1),
            ..ScriptedSim::default()
        };
        let policy = PlusOne::default();
        let mut stepper = MotionStepper::new();
        let report = stepper.step(&mut sim, &policy, Mode::Run, true, true, GOAL).unwrap();
        assert_eq!(
            report.reset,
            Some(EpisodeReset {
                restored_safe_pose: false
            })
        );
        assert_eq!(sim.q, -9.0);
        assert_eq!(sim.goal, GOAL);
    }

    #[test]
    fn policy_errors_propagate() {
        let mut sim = ScriptedSim::default();
        let mut stepper = MotionStepper::new();
        let err = stepper.step(&mut sim, &Failing, Mode::Run, true, false, GOAL).unwrap_err();
        assert_eq!(err, ReachError::Policy("inference server down".into()));
        assert_eq!(sim.steps, 0);
    }
}

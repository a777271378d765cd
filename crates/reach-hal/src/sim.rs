//! In-process stand-ins for headless runs and CI.
//!
//! [`SimArm`] is a kinematic reach environment for one arm with spherical
//! protected bodies (torso, head).  [`SimBus`] records every frame it is sent
//! and exposes the record through a cloneable [`BusRecorder`], so a test can
//! hand the bus to the control loop and still inspect it afterwards.
//! [`NullBus`] is the permanently disconnected bus used when no robot is
//! configured.
//!
//! # Example
//!
//! ```rust
//! use reach_hal::{ArmSide, SimArm, Simulation};
//! use reach_types::Vec3;
//!
//! let mut sim = SimArm::new(ArmSide::Left).with_horizon(100);
//! sim.reset().expect("fresh sim must reset");
//! sim.set_goal(Vec3::new(0.3, 0.15, 0.9));
//! let outcome = sim.step(&[0.0; 7]).expect("zero action must step");
//! assert!(!outcome.episode_over());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use reach_types::{
    Contact, CollisionGroups, JointConfiguration, Observation, ReachError, StepOutcome, Vec3,
};
use tracing::trace;

use crate::actuator::{ActuatorBus, JointTargets};
use crate::kinematics::{ARM_DOF, ArmModel, ArmSide};
use crate::simulation::Simulation;

/// Index ranges of the flat observation produced by [`SimArm`]:
/// `[qpos(7), end_effector(3), goal(3), step_fraction]`.
pub mod layout {
    use std::ops::Range;

    pub const QPOS: Range<usize> = 0..7;
    pub const END_EFFECTOR: Range<usize> = 7..10;
    pub const GOAL: Range<usize> = 10..13;
    pub const STEP_FRACTION: usize = 13;
    pub const DIM: usize = 14;
}

/// Joint displacement, in radians, produced by a unit action component.
pub const MAX_JOINT_STEP: f32 = 0.05;

/// Physics time step in seconds.
pub const DT: f32 = 0.02;

/// Surface distance below which a pair is reported as a contact.
const CONTACT_MARGIN: f32 = 0.005;

/// End-effector distance that counts as reaching the goal.
const SUCCESS_RADIUS: f32 = 0.01;

const DEFAULT_HORIZON: u32 = 500;

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// A protected sphere the arm must not penetrate.
#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    pub gid: usize,
    pub body: String,
    pub center: Vec3,
    pub radius: f32,
}

impl Obstacle {
    pub fn new(gid: usize, body: impl Into<String>, center: Vec3, radius: f32) -> Self {
        Self {
            gid,
            body: body.into(),
            center,
            radius,
        }
    }
}

/// One capsule of the arm: a segment between two link points.
struct ArmGeom {
    gid: usize,
    body: String,
    radius: f32,
}

const UPPER_ARM_GID: usize = 1;
const FOREARM_GID: usize = 2;
const HAND_GID: usize = 3;

fn arm_geoms(side: ArmSide) -> [ArmGeom; 3] {
    let p = side.prefix();
    [
        ArmGeom {
            gid: UPPER_ARM_GID,
            body: format!("{p}_shoulder_yaw_link"),
            radius: 0.03,
        },
        ArmGeom {
            gid: FOREARM_GID,
            body: format!("{p}_elbow_link"),
            radius: 0.03,
        },
        ArmGeom {
            gid: HAND_GID,
            body: format!("{p}_hand_palm_link"),
            radius: 0.025,
        },
    ]
}

fn default_obstacles() -> Vec<Obstacle> {
    vec![
        Obstacle::new(10, "torso_link", Vec3::new(0.0, 0.0, 0.95), 0.11),
        Obstacle::new(11, "head_link", Vec3::new(0.0, 0.0, 1.35), 0.10),
    ]
}

/// Distance from `p` to the segment `a`–`b`.
fn segment_point_distance(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq < 1e-12 {
        return a.distance(p);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (a + ab.scale(t)).distance(p)
}

// ────────────────────────────────────────────────────────────────────────────
// SimArm
// ────────────────────────────────────────────────────────────────────────────

/// Kinematic reach environment for one 7-joint arm.
///
/// Actions are per-joint position increments in `[-1, 1]`, scaled by
/// [`MAX_JOINT_STEP`].  The episode truncates after `horizon` steps and
/// terminates when the hand tip is within 1 cm of the goal.
pub struct SimArm {
    model: ArmModel,
    start_pose: [f32; ARM_DOF],
    qpos: [f32; ARM_DOF],
    qvel: [f32; ARM_DOF],
    goal: Vec3,
    steps: u32,
    horizon: u32,
    obstacles: Vec<Obstacle>,
    contacts: Vec<Contact>,
    closed: bool,
}

impl SimArm {
    pub fn new(side: ArmSide) -> Self {
        let model = ArmModel::new(side);
        let start_pose = model.rest_pose();
        let goal = model.end_effector(&start_pose);
        let mut sim = Self {
            model,
            start_pose,
            qpos: start_pose,
            qvel: [0.0; ARM_DOF],
            goal,
            steps: 0,
            horizon: DEFAULT_HORIZON,
            obstacles: default_obstacles(),
            contacts: Vec::new(),
            closed: false,
        };
        sim.refresh_contacts();
        sim
    }

    /// Episode length in steps before truncation (minimum 1).
    pub fn with_horizon(mut self, horizon: u32) -> Self {
        self.horizon = horizon.max(1);
        self
    }

    /// Pose every episode starts from.
    pub fn with_start_pose(mut self, pose: [f32; ARM_DOF]) -> Self {
        self.start_pose = pose;
        self.model.clamp_joints(&mut self.start_pose);
        self.qpos = self.start_pose;
        self.refresh_contacts();
        self
    }

    /// Add a protected sphere.
    pub fn with_obstacle(mut self, obstacle: Obstacle) -> Self {
        self.obstacles.push(obstacle);
        self.refresh_contacts();
        self
    }

    /// Remove every protected body, including the default torso and head.
    pub fn without_obstacles(mut self) -> Self {
        self.obstacles.clear();
        self.contacts.clear();
        self
    }

    pub fn model(&self) -> &ArmModel {
        &self.model
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    fn ensure_open(&self) -> Result<(), ReachError> {
        if self.closed {
            return Err(ReachError::Simulation("simulation has been closed".into()));
        }
        Ok(())
    }

    fn refresh_contacts(&mut self) {
        let points = self.model.link_points(&self.qpos);
        let segments = [
            (points.shoulder, points.elbow),
            (points.elbow, points.wrist),
            (points.wrist, points.hand),
        ];

        self.contacts.clear();
        for (geom, (a, b)) in arm_geoms(self.model.side()).iter().zip(segments) {
            for obstacle in &self.obstacles {
                let dist = segment_point_distance(a, b, obstacle.center) - geom.radius - obstacle.radius;
                if dist < CONTACT_MARGIN {
                    self.contacts.push(Contact {
                        geom1: geom.gid,
                        geom2: obstacle.gid,
                        body1: Some(geom.body.clone()),
                        body2: Some(obstacle.body.clone()),
                        dist,
                    });
                }
            }
        }
    }
}

impl Simulation for SimArm {
    fn reset(&mut self) -> Result<Observation, ReachError> {
        self.ensure_open()?;
        self.qpos = self.start_pose;
        self.qvel = [0.0; ARM_DOF];
        self.steps = 0;
        self.refresh_contacts();
        Ok(self.observe())
    }

    fn step(&mut self, action: &[f32]) -> Result<StepOutcome, ReachError> {
        self.ensure_open()?;
        if action.len() != ARM_DOF {
            return Err(ReachError::Simulation(format!(
                "action has {} components, expected {ARM_DOF}",
                action.len()
            )));
        }
        if action.iter().any(|a| !a.is_finite()) {
            return Err(ReachError::Simulation("action contains non-finite values".into()));
        }

        let previous = self.qpos;
        for (q, a) in self.qpos.iter_mut().zip(action) {
            *q += a.clamp(-1.0, 1.0) * MAX_JOINT_STEP;
        }
        self.model.clamp_joints(&mut self.qpos);
        for ((v, q), p) in self.qvel.iter_mut().zip(self.qpos).zip(previous) {
            *v = (q - p) / DT;
        }
        self.steps += 1;
        self.refresh_contacts();

        let distance = self.model.end_effector(&self.qpos).distance(self.goal);
        Ok(StepOutcome {
            observation: self.observe(),
            reward: -distance,
            terminated: distance < SUCCESS_RADIUS,
            truncated: self.steps >= self.horizon,
        })
    }

    fn observe(&self) -> Observation {
        let mut obs = Vec::with_capacity(layout::DIM);
        obs.extend_from_slice(&self.qpos);
        obs.extend_from_slice(&self.model.end_effector(&self.qpos).to_array());
        obs.extend_from_slice(&self.goal.to_array());
        obs.push(self.steps as f32 / self.horizon as f32);
        obs
    }

    fn action_dim(&self) -> usize {
        ARM_DOF
    }

    fn set_goal(&mut self, goal: Vec3) {
        self.goal = goal;
    }

    fn goal(&self) -> Vec3 {
        self.goal
    }

    fn end_effector(&self) -> Option<Vec3> {
        Some(self.model.end_effector(&self.qpos))
    }

    fn contacts(&self) -> Option<Vec<Contact>> {
        Some(self.contacts.clone())
    }

    fn collision_groups(&self) -> Option<CollisionGroups> {
        Some(CollisionGroups {
            arm: [UPPER_ARM_GID, FOREARM_GID, HAND_GID].into_iter().collect(),
            protected: self.obstacles.iter().map(|o| o.gid).collect(),
        })
    }

    fn configuration(&self) -> JointConfiguration {
        JointConfiguration {
            qpos: self.qpos.to_vec(),
            qvel: self.qvel.to_vec(),
        }
    }

    fn restore(&mut self, config: &JointConfiguration) -> Result<(), ReachError> {
        if config.qpos.len() != ARM_DOF {
            return Err(ReachError::Simulation(format!(
                "snapshot has {} joint positions, expected {ARM_DOF}",
                config.qpos.len()
            )));
        }
        self.qpos.copy_from_slice(&config.qpos);
        self.qvel = [0.0; ARM_DOF];
        self.refresh_contacts();
        Ok(())
    }

    fn reset_step_counter(&mut self) {
        self.steps = 0;
    }

    fn joint_position(&self, joint: &str) -> Option<f32> {
        self.model.joint_index(joint).map(|i| self.qpos[i])
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Buses
// ────────────────────────────────────────────────────────────────────────────

/// Shared view of the frames a [`SimBus`] has received.
#[derive(Clone, Default)]
pub struct BusRecorder {
    frames: Arc<Mutex<Vec<JointTargets>>>,
    connected: Arc<AtomicBool>,
}

impl BusRecorder {
    /// Every frame sent so far, oldest first.
    pub fn frames(&self) -> Vec<JointTargets> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Simulate the bus coming up or dropping out.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

/// Loopback bus that records frames instead of transmitting them.
pub struct SimBus {
    recorder: BusRecorder,
}

impl SimBus {
    /// A connected bus with an empty record.
    pub fn new() -> Self {
        let recorder = BusRecorder::default();
        recorder.set_connected(true);
        Self { recorder }
    }

    pub fn recorder(&self) -> BusRecorder {
        self.recorder.clone()
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorBus for SimBus {
    fn connected(&self) -> bool {
        self.recorder.connected.load(Ordering::SeqCst)
    }

    fn send(&mut self, targets: &JointTargets) {
        trace!(motors = targets.len(), "sim bus frame");
        self.recorder
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(targets.clone());
    }
}

/// A bus that never connects.  Frames are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl ActuatorBus for NullBus {
    fn connected(&self) -> bool {
        false
    }

    fn send(&mut self, _targets: &JointTargets) {}
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_layout() {
        let mut sim = SimArm::new(ArmSide::Left);
        sim.set_goal(Vec3::new(0.3, 0.1, 0.9));
        let obs = sim.reset().unwrap();
        assert_eq!(obs.len(), layout::DIM);
        assert_eq!(&obs[layout::QPOS], &sim.model().rest_pose());
        assert_eq!(&obs[layout::GOAL], &[0.3f32, 0.1, 0.9]);
        assert_eq!(obs[layout::STEP_FRACTION], 0.0);
        let ee = sim.end_effector().unwrap();
        assert_eq!(&obs[layout::END_EFFECTOR], &ee.to_array());
    }

    #[test]
    fn rest_pose_is_contact_free() {
        let sim = SimArm::new(ArmSide::Left);
        assert_eq!(sim.contacts(), Some(vec![]));
        let sim = SimArm::new(ArmSide::Right);
        assert_eq!(sim.contacts(), Some(vec![]));
    }

    #[test]
    fn step_moves_joints_by_scaled_action() {
        let mut sim = SimArm::new(ArmSide::Left).without_obstacles();
        sim.reset().unwrap();
        let before = sim.joint_position("left_elbow_joint").unwrap();
        sim.step(&[0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0]).unwrap();
        let after = sim.joint_position("left_elbow_joint").unwrap();
        // Actions saturate at 1.0.
        assert!((after - before - MAX_JOINT_STEP).abs() < 1e-6);
        assert!((sim.configuration().qvel[3] - MAX_JOINT_STEP / DT).abs() < 1e-3);
    }

    #[test]
    fn step_rejects_wrong_length() {
        let mut sim = SimArm::new(ArmSide::Left);
        assert!(matches!(sim.step(&[0.0; 3]), Err(ReachError::Simulation(_))));
    }

    #[test]
    fn horizon_truncates_and_counter_reset_extends_episode() {
        let mut sim = SimArm::new(ArmSide::Left).with_horizon(3);
        sim.set_goal(Vec3::new(0.0, 0.6, 1.4));
        sim.reset().unwrap();
        assert!(!sim.step(&[0.0; 7]).unwrap().truncated);
        assert!(!sim.step(&[0.0; 7]).unwrap().truncated);
        sim.reset_step_counter();
        assert!(!sim.step(&[0.0; 7]).unwrap().truncated);
        assert!(!sim.step(&[0.0; 7]).unwrap().truncated);
        assert!(sim.step(&[0.0; 7]).unwrap().truncated);
    }

    #[test]
    fn restore_zeroes_velocity_and_recomputes_kinematics() {
        let mut sim = SimArm::new(ArmSide::Left).without_obstacles();
        sim.reset().unwrap();
        let snapshot = sim.configuration();
        let ee_before = sim.end_effector().unwrap();

        sim.step(&[1.0; 7]).unwrap();
        assert_ne!(sim.end_effector().unwrap(), ee_before);

        sim.restore(&snapshot).unwrap();
        assert_eq!(sim.end_effector().unwrap(), ee_before);
        assert!(sim.configuration().qvel.iter().all(|v| *v == 0.0));

        let bad = JointConfiguration {
            qpos: vec![0.0; 2],
            qvel: vec![],
        };
        assert!(sim.restore(&bad).is_err());
    }

    #[test]
    fn obstacle_overlap_is_reported_with_negative_distance() {
        let mut sim = SimArm::new(ArmSide::Left);
        sim.reset().unwrap();
        let ee = sim.end_effector().unwrap();
        let sim = sim.with_obstacle(Obstacle::new(20, "tray_link", ee, 0.1));

        let contacts = sim.contacts().unwrap();
        let hit = contacts
            .iter()
            .find(|c| c.geom1 == FOREARM_GID && c.geom2 == 20)
            .expect("forearm ends inside the sphere");
        assert!(hit.dist < 0.0);
        assert!(sim.collision_groups().unwrap().is_arm_vs_protected(hit.geom1, hit.geom2));
        assert!(contacts.iter().any(|c| c.touches_body("hand")));
    }

    #[test]
    fn closed_sim_refuses_to_step() {
        let mut sim = SimArm::new(ArmSide::Left);
        sim.close();
        assert!(sim.reset().is_err());
        assert!(sim.step(&[0.0; 7]).is_err());
    }

    #[test]
    fn unknown_joint_is_none() {
        let sim = SimArm::new(ArmSide::Left);
        assert!(sim.joint_position("right_elbow_joint").is_none());
        assert!(sim.joint_position("left_wrist_yaw_joint").is_some());
    }

    #[test]
    fn sim_bus_records_frames_through_recorder() {
        let mut bus = SimBus::new();
        let recorder = bus.recorder();
        assert!(bus.connected());

        let frame: JointTargets = [(15, 0.1)].into_iter().collect();
        bus.send(&frame);
        assert_eq!(recorder.frame_count(), 1);
        assert_eq!(recorder.frames()[0], frame);

        recorder.set_connected(false);
        assert!(!bus.connected());
        assert!(!NullBus.connected());
    }
}

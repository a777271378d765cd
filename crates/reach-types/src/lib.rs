use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A point or offset in the task-space frame, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn from_array(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn scale(self, k: f32) -> Vec3 {
        Vec3::new(self.x * k, self.y * k, self.z * k)
    }

    /// Euclidean length.
    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Euclidean distance between two points.
    pub fn distance(self, other: Vec3) -> f32 {
        (self - other).norm()
    }

    /// Component-wise clamp into `[low, high]`.
    pub fn clamp(self, low: Vec3, high: Vec3) -> Vec3 {
        Vec3::new(
            self.x.clamp(low.x, high.x),
            self.y.clamp(low.y, high.y),
            self.z.clamp(low.z, high.z),
        )
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn get(self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn with(mut self, axis: Axis, value: f32) -> Vec3 {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
        self
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// One Cartesian axis of the goal.
///
/// Parsed case-insensitively (`"x"`, `"Y"`, ...); serialised lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl FromStr for Axis {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(ReachError::InvalidCommand(format!(
                "unknown axis '{other}' (expected x, y or z)"
            ))),
        }
    }
}

impl TryFrom<String> for Axis {
    type Error = ReachError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// Arbiter classification for one control tick.
///
/// `Collision` is a sticky sub-state of `Hold`: both apply a null action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Run,
    Hold,
    Collision,
}

impl Mode {
    /// Fixed-width label shown on the control surface.
    pub const fn label(self) -> &'static str {
        match self {
            Mode::Run => "RUN ",
            Mode::Hold => "HOLD",
            Mode::Collision => "COLL",
        }
    }

    /// `true` for every mode that must not invoke the policy.
    pub const fn is_holding(self) -> bool {
        matches!(self, Mode::Hold | Mode::Collision)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One contact reported by the simulation.
///
/// `dist` is the signed surface distance: negative values are penetration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub geom1: usize,
    pub geom2: usize,
    /// Name of the body owning `geom1`, when the simulation knows it.
    pub body1: Option<String>,
    pub body2: Option<String>,
    pub dist: f32,
}

impl Contact {
    /// Penetration depth in metres (never negative).
    pub fn penetration(&self) -> f32 {
        (-self.dist).max(0.0)
    }

    /// `true` if either body name contains `marker`.
    pub fn touches_body(&self, marker: &str) -> bool {
        [&self.body1, &self.body2]
            .into_iter()
            .flatten()
            .any(|name| name.contains(marker))
    }
}

/// Geometry ids partitioned into the arm being supervised and the bodies it
/// must never penetrate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionGroups {
    pub arm: BTreeSet<usize>,
    pub protected: BTreeSet<usize>,
}

impl CollisionGroups {
    /// `true` when the pair is one arm geometry against one protected
    /// geometry, in either order.
    pub fn is_arm_vs_protected(&self, a: usize, b: usize) -> bool {
        (self.arm.contains(&a) && self.protected.contains(&b))
            || (self.arm.contains(&b) && self.protected.contains(&a))
    }
}

/// Joint-space snapshot used for safe rollback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JointConfiguration {
    pub qpos: Vec<f32>,
    pub qvel: Vec<f32>,
}

/// Flat observation vector handed to the policy.
pub type Observation = Vec<f32>;

/// Flat action vector produced by the policy.
pub type Action = Vec<f32>;

/// Result of advancing the simulation by one physics step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
}

impl StepOutcome {
    /// `true` when the episode must be reset before stepping again.
    pub fn episode_over(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Snapshot returned by a status query on the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub goal: [f32; 3],
    pub mode: String,
    pub out_sim: bool,
    pub out_robot: bool,
    pub robot_ok: bool,
    pub loop_alive: bool,
    pub tick: u64,
}

/// Unified event wrapper for the supervisor event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"reach-runtime::control_loop"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EventPayload {
    /// Per-tick status, as a status query would return it.
    Status(StatusSnapshot),
    ModeChanged { from: Mode, to: Mode },
    CollisionDetected {
        geom1: usize,
        geom2: usize,
        penetration: f32,
    },
    /// The simulation episode ended and was reset.
    EpisodeReset { restored_safe_pose: bool },
    /// The control loop stopped on a fatal simulation or policy error.
    LoopFault { message: String },
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReachError {
    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("Simulation Fault: {0}")]
    Simulation(String),

    #[error("Policy Fault: {0}")]
    Policy(String),

    #[error("Invalid Command: {0}")]
    InvalidCommand(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_distance_and_clamp() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 0.0);
        assert!((a.distance(b) - 5.0).abs() < 1e-6);

        let low = Vec3::new(-1.0, -1.0, -1.0);
        let high = Vec3::new(1.0, 1.0, 1.0);
        assert_eq!(Vec3::new(2.0, -3.0, 0.5).clamp(low, high), Vec3::new(1.0, -1.0, 0.5));
    }

    #[test]
    fn vec3_axis_accessors() {
        let p = Vec3::new(0.1, 0.2, 0.3).with(Axis::Y, 0.9);
        assert_eq!(p.get(Axis::Y), 0.9);
        assert_eq!(p.get(Axis::X), 0.1);
        assert!(!Vec3::new(f32::NAN, 0.0, 0.0).is_finite());
    }

    #[test]
    fn axis_parses_case_insensitively() {
        assert_eq!("x".parse::<Axis>().unwrap(), Axis::X);
        assert_eq!(" Z ".parse::<Axis>().unwrap(), Axis::Z);
        assert!(matches!("w".parse::<Axis>(), Err(ReachError::InvalidCommand(_))));
    }

    #[test]
    fn axis_deserializes_from_any_case() {
        let axis: Axis = serde_json::from_str("\"Y\"").unwrap();
        assert_eq!(axis, Axis::Y);
        assert!(serde_json::from_str::<Axis>("\"q\"").is_err());
        assert_eq!(serde_json::to_string(&Axis::Z).unwrap(), "\"z\"");
    }

    #[test]
    fn mode_labels_are_fixed_width() {
        for mode in [Mode::Run, Mode::Hold, Mode::Collision] {
            assert_eq!(mode.label().len(), 4);
        }
        assert_eq!(Mode::Run.label(), "RUN ");
        assert_eq!(Mode::Collision.to_string(), "COLL");
        assert!(Mode::Collision.is_holding());
        assert!(!Mode::Run.is_holding());
    }

    #[test]
    fn contact_penetration_is_non_negative() {
        let mut c = Contact {
            geom1: 1,
            geom2: 2,
            body1: Some("left_elbow_link".into()),
            body2: None,
            dist: -0.004,
        };
        assert!((c.penetration() - 0.004).abs() < 1e-6);
        c.dist = 0.01;
        assert_eq!(c.penetration(), 0.0);
        assert!(c.touches_body("elbow"));
        assert!(!c.touches_body("hand"));
    }

    #[test]
    fn collision_groups_match_either_order() {
        let groups = CollisionGroups {
            arm: [1, 2].into_iter().collect(),
            protected: [10].into_iter().collect(),
        };
        assert!(groups.is_arm_vs_protected(1, 10));
        assert!(groups.is_arm_vs_protected(10, 2));
        assert!(!groups.is_arm_vs_protected(1, 2));
        assert!(!groups.is_arm_vs_protected(10, 10));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "reach-runtime::control_loop",
            EventPayload::ModeChanged {
                from: Mode::Hold,
                to: Mode::Run,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ModeChanged"));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert!(matches!(
            back.payload,
            EventPayload::ModeChanged {
                from: Mode::Hold,
                to: Mode::Run
            }
        ));
    }

    #[test]
    fn reach_error_display() {
        let err = ReachError::Configuration("policy file missing".into());
        assert!(err.to_string().contains("Configuration Error"));
        let err = ReachError::InvalidCommand("bad axis".into());
        assert!(err.to_string().contains("bad axis"));
    }
}

//! Forward kinematics for one 7-joint humanoid arm.
//!
//! The chain is shoulder pitch → roll → yaw, elbow flexion, then wrist
//! roll → pitch → yaw.  Link frames are composed from elementary rotations;
//! the right arm mirrors the left by negating roll and yaw, so the same
//! joint limits apply to both sides.

use serde::{Deserialize, Serialize};

use reach_types::Vec3;

/// Number of actuated joints in one arm.
pub const ARM_DOF: usize = 7;

/// Joint name suffixes in chain order; prefixed with `left_` or `right_`.
pub const JOINT_SUFFIXES: [&str; ARM_DOF] = [
    "shoulder_pitch_joint",
    "shoulder_roll_joint",
    "shoulder_yaw_joint",
    "elbow_joint",
    "wrist_roll_joint",
    "wrist_pitch_joint",
    "wrist_yaw_joint",
];

/// Which arm the supervisor drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmSide {
    #[default]
    Left,
    Right,
}

impl ArmSide {
    pub const fn prefix(self) -> &'static str {
        match self {
            ArmSide::Left => "left",
            ArmSide::Right => "right",
        }
    }

    /// +1 for the left arm (positive world y), −1 for the right.
    pub const fn sign(self) -> f32 {
        match self {
            ArmSide::Left => 1.0,
            ArmSide::Right => -1.0,
        }
    }
}

/// A 3x3 rotation matrix, row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rotation {
    m: [[f32; 3]; 3],
}

impl Rotation {
    const IDENTITY: Rotation = Rotation {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    fn rot_x(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]],
        }
    }

    fn rot_y(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            m: [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]],
        }
    }

    fn rot_z(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            m: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// `self * other`
    fn mul(&self, other: &Rotation) -> Rotation {
        let mut out = [[0.0; 3]; 3];
        for (row, out_row) in out.iter_mut().enumerate() {
            for (col, cell) in out_row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[row][k] * other.m[k][col]).sum();
            }
        }
        Rotation { m: out }
    }

    fn apply(&self, v: Vec3) -> Vec3 {
        let [a, b, c] = self.m;
        Vec3::new(
            a[0] * v.x + a[1] * v.y + a[2] * v.z,
            b[0] * v.x + b[1] * v.y + b[2] * v.z,
            c[0] * v.x + c[1] * v.y + c[2] * v.z,
        )
    }
}

/// World positions of the arm's joint centres for one configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkPoints {
    pub shoulder: Vec3,
    pub elbow: Vec3,
    pub wrist: Vec3,
    /// Tip of the hand; this is the end effector.
    pub hand: Vec3,
}

/// Geometry and joint limits of one arm.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmModel {
    side: ArmSide,
    shoulder: Vec3,
    upper_arm: f32,
    forearm: f32,
    hand: f32,
    limits: [(f32, f32); ARM_DOF],
}

impl ArmModel {
    /// Humanoid proportions: shoulder 1.1 m above the floor and 0.15 m off
    /// the midline, 0.25 m upper arm and forearm, 0.08 m hand.
    pub fn new(side: ArmSide) -> Self {
        Self {
            side,
            shoulder: Vec3::new(0.0, 0.15 * side.sign(), 1.1),
            upper_arm: 0.25,
            forearm: 0.25,
            hand: 0.08,
            limits: [
                (-2.9, 2.9),
                (-1.5, 2.2),
                (-2.6, 2.6),
                (-2.6, 0.3),
                (-1.9, 1.9),
                (-1.6, 1.6),
                (-1.6, 1.6),
            ],
        }
    }

    pub fn side(&self) -> ArmSide {
        self.side
    }

    /// Fully qualified joint names in chain order, e.g.
    /// `left_shoulder_pitch_joint`.
    pub fn joint_names(&self) -> Vec<String> {
        JOINT_SUFFIXES
            .iter()
            .map(|suffix| format!("{}_{suffix}", self.side.prefix()))
            .collect()
    }

    /// Index of `name` in the chain, if it belongs to this arm.
    pub fn joint_index(&self, name: &str) -> Option<usize> {
        let suffix = name.strip_prefix(self.side.prefix())?.strip_prefix('_')?;
        JOINT_SUFFIXES.iter().position(|s| *s == suffix)
    }

    pub fn limits(&self) -> &[(f32, f32); ARM_DOF] {
        &self.limits
    }

    /// Clamp every joint into its limit range in place.
    pub fn clamp_joints(&self, q: &mut [f32]) {
        for (value, (low, high)) in q.iter_mut().zip(self.limits.iter()) {
            *value = value.clamp(*low, *high);
        }
    }

    /// Arm raised forward with a bent elbow, hand in front of the chest.
    pub fn rest_pose(&self) -> [f32; ARM_DOF] {
        [-0.6, 0.0, 0.0, -0.9, 0.0, 0.0, 0.0]
    }

    /// Joint centres for configuration `q` (length [`ARM_DOF`]; missing
    /// trailing joints are treated as zero).
    pub fn link_points(&self, q: &[f32]) -> LinkPoints {
        let j = |i: usize| q.get(i).copied().unwrap_or(0.0);
        let sign = self.side.sign();
        let down = |len: f32| Vec3::new(0.0, 0.0, -len);

        let shoulder = Rotation::IDENTITY
            .mul(&Rotation::rot_y(j(0)))
            .mul(&Rotation::rot_x(j(1) * sign))
            .mul(&Rotation::rot_z(j(2) * sign));
        let elbow = self.shoulder + shoulder.apply(down(self.upper_arm));

        let forearm = shoulder.mul(&Rotation::rot_y(j(3)));
        let wrist = elbow + forearm.apply(down(self.forearm));

        let hand_frame = forearm
            .mul(&Rotation::rot_x(j(4) * sign))
            .mul(&Rotation::rot_y(j(5)))
            .mul(&Rotation::rot_z(j(6) * sign));
        let hand = wrist + hand_frame.apply(down(self.hand));

        LinkPoints {
            shoulder: self.shoulder,
            elbow,
            wrist,
            hand,
        }
    }

    /// End-effector position for configuration `q`.
    pub fn end_effector(&self, q: &[f32]) -> Vec3 {
        self.link_points(q).hand
    }

    /// Positional Jacobian of the end effector (3 x [`ARM_DOF`]) by central
    /// differences.
    pub fn jacobian(&self, q: &[f32]) -> [[f32; ARM_DOF]; 3] {
        const H: f32 = 1e-3;
        let mut jac = [[0.0; ARM_DOF]; 3];
        let mut probe = [0.0; ARM_DOF];
        for (dst, src) in probe.iter_mut().zip(q) {
            *dst = *src;
        }
        for i in 0..ARM_DOF {
            let original = probe[i];
            probe[i] = original + H;
            let plus = self.end_effector(&probe);
            probe[i] = original - H;
            let minus = self.end_effector(&probe);
            probe[i] = original;

            let d = (plus - minus).scale(1.0 / (2.0 * H));
            jac[0][i] = d.x;
            jac[1][i] = d.y;
            jac[2][i] = d.z;
        }
        jac
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

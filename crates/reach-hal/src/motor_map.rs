//! Mapping from the robot's logical motor indices to simulation joint names.

use crate::actuator::JointTargets;
use crate::kinematics::{ArmSide, JOINT_SUFFIXES};
use crate::simulation::Simulation;

/// First motor index of each arm on the G1 humanoid's low-level bus.
const G1_LEFT_ARM_BASE: u8 = 15;
const G1_RIGHT_ARM_BASE: u8 = 22;

/// Ordered `(motor index, joint name)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MotorMap {
    entries: Vec<(u8, String)>,
}

impl MotorMap {
    pub fn new(entries: impl IntoIterator<Item = (u8, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Both G1 arms: motors 15–21 drive the left arm and 22–28 the right,
    /// each from shoulder pitch to wrist yaw.
    pub fn g1_arms() -> Self {
        let arm = |base: u8, side: ArmSide| {
            (base..)
                .zip(JOINT_SUFFIXES)
                .map(move |(motor, suffix)| (motor, format!("{}_{suffix}", side.prefix())))
        };
        Self::new(
            arm(G1_LEFT_ARM_BASE, ArmSide::Left).chain(arm(G1_RIGHT_ARM_BASE, ArmSide::Right)),
        )
    }

    pub fn entries(&self) -> &[(u8, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the entries whose joint exists in `sim`.
    ///
    /// The result can be cached: joint names do not change for a model.
    pub fn resolve(&self, sim: &dyn Simulation) -> MotorMap {
        Self::new(
            self.entries
                .iter()
                .filter(|(_, joint)| sim.joint_position(joint).is_some())
                .cloned(),
        )
    }

    /// Read the current position of every mapped joint.  Joints missing
    /// from the model are skipped.
    pub fn sample(&self, sim: &dyn Simulation) -> JointTargets {
        self.entries
            .iter()
            .filter_map(|(motor, joint)| sim.joint_position(joint).map(|q| (*motor, q)))
            .collect()
    }
}

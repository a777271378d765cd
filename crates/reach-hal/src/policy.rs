//! [`Policy`] – maps an observation to an action.
//!
//! Three implementations ship with the crate:
//!
//! - [`ReachingPolicy`]: a damped-least-squares reaching controller built on
//!   [`ArmModel`].  Needs no model file, so it is the default.
//! - [`LinearPolicy`]: `action = clip(W · obs + b)` with weights loaded from a
//!   JSON file exported by a training pipeline.
//! - [`HttpPolicy`]: forwards the observation to a remote inference server.
//!
//! # Example
//!
//! ```rust
//! use reach_hal::{ArmModel, ArmSide, Policy, ReachingPolicy, SimArm, Simulation};
//!
//! let mut sim = SimArm::new(ArmSide::Left);
//! let policy = ReachingPolicy::new(ArmModel::new(ArmSide::Left));
//! let obs = sim.reset().unwrap();
//! let action = policy.predict(&obs, true).unwrap();
//! assert_eq!(action.len(), sim.action_dim());
//! ```

use std::path::{Path, PathBuf};

use reach_types::{Action, ReachError, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kinematics::{ARM_DOF, ArmModel};
use crate::sim::{MAX_JOINT_STEP, layout};

/// A trained (or hand-written) controller.
pub trait Policy: Send {
    /// Compute the action for `observation`.
    ///
    /// `deterministic` requests the mean action of a stochastic policy; the
    /// supervisor always passes `true`.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Policy`] when the observation has the wrong
    /// shape or inference fails.
    fn predict(&self, observation: &[f32], deterministic: bool) -> Result<Action, ReachError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while loading a policy model file.
#[derive(Error, Debug)]
pub enum PolicyLoadError {
    #[error("policy model not found at {0}")]
    NotFound(PathBuf),
    #[error("cannot read policy model {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse policy model {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("malformed policy model: {0}")]
    Shape(String),
}

impl From<PolicyLoadError> for ReachError {
    fn from(err: PolicyLoadError) -> Self {
        ReachError::Configuration(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LinearPolicy
// ─────────────────────────────────────────────────────────────────────────────

fn default_action_clip() -> f32 {
    1.0
}

/// Affine policy loaded from JSON:
///
/// ```json
/// { "weights": [[...], ...], "bias": [...], "action_clip": 1.0 }
/// ```
///
/// `weights` has one row per action component and one column per
/// observation component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearPolicy {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    #[serde(default = "default_action_clip")]
    action_clip: f32,
}

impl LinearPolicy {
    /// Build from explicit weights.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyLoadError::Shape`] when rows are ragged, empty or do
    /// not match `bias`.
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self, PolicyLoadError> {
        let policy = Self {
            weights,
            bias,
            action_clip: default_action_clip(),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Load and validate a model file.
    ///
    /// # Errors
    ///
    /// - [`PolicyLoadError::NotFound`] if `path` does not exist.
    /// - [`PolicyLoadError::Io`] / [`PolicyLoadError::Parse`] on read or
    ///   JSON failures.
    /// - [`PolicyLoadError::Shape`] if the matrices are inconsistent.
    pub fn from_file(path: &Path) -> Result<Self, PolicyLoadError> {
        if !path.exists() {
            return Err(PolicyLoadError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let policy: LinearPolicy =
            serde_json::from_str(&raw).map_err(|source| PolicyLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), PolicyLoadError> {
        if self.weights.is_empty() {
            return Err(PolicyLoadError::Shape("weights matrix is empty".into()));
        }
        if self.weights.len() != self.bias.len() {
            return Err(PolicyLoadError::Shape(format!(
                "{} weight rows but {} bias entries",
                self.weights.len(),
                self.bias.len()
            )));
        }
        let width = self.weights[0].len();
        if width == 0 || self.weights.iter().any(|row| row.len() != width) {
            return Err(PolicyLoadError::Shape("weight rows must share a non-zero width".into()));
        }
        if !(self.action_clip.is_finite() && self.action_clip > 0.0) {
            return Err(PolicyLoadError::Shape("action_clip must be positive".into()));
        }
        Ok(())
    }

    /// Observation length this policy expects.
    pub fn input_dim(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    pub fn output_dim(&self) -> usize {
        self.bias.len()
    }
}

impl Policy for LinearPolicy {
    fn predict(&self, observation: &[f32], _deterministic: bool) -> Result<Action, ReachError> {
        if observation.len() != self.input_dim() {
            return Err(ReachError::Policy(format!(
                "observation has {} components, model expects {}",
                observation.len(),
                self.input_dim()
            )));
        }
        let clip = self.action_clip;
        Ok(self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| {
                let dot: f32 = row.iter().zip(observation).map(|(w, o)| w * o).sum();
                (dot + b).clamp(-clip, clip)
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpPolicy
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PredictRequest<'a> {
    observation: &'a [f32],
    deterministic: bool,
}

#[derive(Deserialize)]
struct PredictResponse {
    action: Vec<f32>,
}

/// Remote inference over HTTP: `POST {base_url}/predict` with
/// `{"observation": [...], "deterministic": true}`, answered by
/// `{"action": [...]}`.
///
/// The call blocks the control loop for its full round trip.
pub struct HttpPolicy {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpPolicy {
    /// Create a client for `base_url` (e.g. `"http://localhost:8500"`).
    ///
    /// Must be called outside an async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Configuration`] if the HTTP client cannot be
    /// initialised.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ReachError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| ReachError::Configuration(format!("policy client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Policy for HttpPolicy {
    fn predict(&self, observation: &[f32], deterministic: bool) -> Result<Action, ReachError> {
        let url = format!("{}/predict", self.base_url);
        let response: PredictResponse = self
            .client
            .post(&url)
            .json(&PredictRequest {
                observation,
                deterministic,
            })
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| ReachError::Policy(format!("inference request to {url} failed: {e}")))?;
        Ok(response.action)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReachingPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Damped-least-squares reaching controller.
///
/// Reads joint positions and goal from a [`SimArm`](crate::SimArm)-layout
/// observation and returns the joint increment
/// `gain · Jᵀ (J Jᵀ + λ² I)⁻¹ (goal − ee)`, expressed in action units and
/// scaled uniformly so no component leaves `[-1, 1]`.
///
/// The controller is deterministic; the `deterministic` flag is ignored.
#[derive(Debug, Clone)]
pub struct ReachingPolicy {
    model: ArmModel,
    gain: f32,
    damping: f32,
}

impl ReachingPolicy {
    pub fn new(model: ArmModel) -> Self {
        Self {
            model,
            gain: 0.5,
            damping: 0.05,
        }
    }

    /// Fraction of the remaining error corrected per step, in `(0, 1]`.
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain.clamp(f32::EPSILON, 1.0);
        self
    }
}

/// Solve the 3x3 system `a · y = e` by cofactor inversion.
fn solve3(a: [[f32; 3]; 3], e: [f32; 3]) -> Option<[f32; 3]> {
    let cof = |r0: usize, r1: usize, c0: usize, c1: usize| a[r0][c0] * a[r1][c1] - a[r0][c1] * a[r1][c0];
    let inv_t = [
        [cof(1, 2, 1, 2), -cof(1, 2, 0, 2), cof(1, 2, 0, 1)],
        [-cof(0, 2, 1, 2), cof(0, 2, 0, 2), -cof(0, 2, 0, 1)],
        [cof(0, 1, 1, 2), -cof(0, 1, 0, 2), cof(0, 1, 0, 1)],
    ];
    let det = a[0][0] * inv_t[0][0] + a[0][1] * inv_t[0][1] + a[0][2] * inv_t[0][2];
    if det.abs() < 1e-9 {
        return None;
    }
    // inv_t holds the cofactor matrix C; A⁻¹ = Cᵀ / det.
    let mut y = [0.0; 3];
    for (i, yi) in y.iter_mut().enumerate() {
        *yi = (0..3).map(|k| inv_t[k][i] * e[k]).sum::<f32>() / det;
    }
    Some(y)
}

impl Policy for ReachingPolicy {
    fn predict(&self, observation: &[f32], _deterministic: bool) -> Result<Action, ReachError> {
        if observation.len() < layout::DIM {
            return Err(ReachError::Policy(format!(
                "observation has {} components, expected {}",
                observation.len(),
                layout::DIM
            )));
        }
        let q = &observation[layout::QPOS];
        let goal = &observation[layout::GOAL];
        let goal = Vec3::new(goal[0], goal[1], goal[2]);
        let error = (goal - self.model.end_effector(q)).to_array();

        let jac = self.model.jacobian(q);
        let mut jjt = [[0.0; 3]; 3];
        for (r, row) in jjt.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..ARM_DOF).map(|k| jac[r][k] * jac[c][k]).sum();
            }
            row[r] += self.damping * self.damping;
        }

        let Some(y) = solve3(jjt, error) else {
            return Ok(vec![0.0; ARM_DOF]);
        };

        let mut action: Action = (0..ARM_DOF)
            .map(|k| self.gain * (0..3).map(|r| jac[r][k] * y[r]).sum::<f32>() / MAX_JOINT_STEP)
            .collect();
        let peak = action.iter().fold(0.0_f32, |m, a| m.max(a.abs()));
        if peak > 1.0 {
            action.iter_mut().for_each(|a| *a /= peak);
        }
        Ok(action)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::kinematics::ArmSide;
    use crate::sim::SimArm;
    use crate::simulation::Simulation;

    #[test]
    fn solve3_inverts_a_known_system() {
        let a = [[2.0, 0.0, 1.0], [0.0, 3.0, 0.0], [1.0, 0.0, 2.0]];
        let y = solve3(a, [3.0, 6.0, 3.0]).unwrap();
        assert!((y[0] - 1.0).abs() < 1e-5);
        assert!((y[1] - 2.0).abs() < 1e-5);
        assert!((y[2] - 1.0).abs() < 1e-5);
        assert!(solve3([[0.0; 3]; 3], [1.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn reaching_policy_converges_on_sim_arm() {
        let side = ArmSide::Left;
        let mut sim = SimArm::new(side).without_obstacles().with_horizon(10_000);
        let policy = ReachingPolicy::new(ArmModel::new(side));
        let goal = Vec3::new(0.297, 0.152, 0.888);
        sim.set_goal(goal);
        let mut obs = sim.reset().unwrap();

        for _ in 0..200 {
            let action = policy.predict(&obs, true).unwrap();
            assert!(action.iter().all(|a| a.abs() <= 1.0 + 1e-6));
            obs = sim.step(&action).unwrap().observation;
        }
        let dist = sim.end_effector().unwrap().distance(goal);
        assert!(dist < 0.01, "end effector still {dist} m from goal");
    }

    #[test]
    fn reaching_policy_is_idle_at_the_goal() {
        let side = ArmSide::Right;
        let mut sim = SimArm::new(side);
        let obs = sim.reset().unwrap();
        // Default goal is the start pose's end effector.
        let action = ReachingPolicy::new(ArmModel::new(side)).predict(&obs, true).unwrap();
        assert!(action.iter().all(|a| a.abs() < 1e-3), "{action:?}");
    }

    #[test]
    fn reaching_policy_rejects_short_observation() {
        let policy = ReachingPolicy::new(ArmModel::new(ArmSide::Left));
        assert!(matches!(policy.predict(&[0.0; 4], true), Err(ReachError::Policy(_))));
    }

    #[test]
    fn linear_policy_applies_affine_map_and_clips() {
        let policy = LinearPolicy::new(vec![vec![1.0, 0.0], vec![0.0, 10.0]], vec![0.5, 0.0]).unwrap();
        let action = policy.predict(&[0.25, 1.0], true).unwrap();
        assert_eq!(action, vec![0.75, 1.0]);
        assert!(matches!(policy.predict(&[1.0], true), Err(ReachError::Policy(_))));
    }

    #[test]
    fn linear_policy_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"weights": [[0.0, 2.0]], "bias": [0.1], "action_clip": 0.5}}"#).unwrap();
        let policy = LinearPolicy::from_file(file.path()).unwrap();
        assert_eq!(policy.input_dim(), 2);
        assert_eq!(policy.output_dim(), 1);
        assert_eq!(policy.predict(&[0.0, 1.0], true).unwrap(), vec![0.5]);
    }

    #[test]
    fn missing_model_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LinearPolicy::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, PolicyLoadError::NotFound(_)));
        assert!(matches!(ReachError::from(err), ReachError::Configuration(_)));
    }

    #[test]
    fn ragged_model_is_rejected() {
        let err = LinearPolicy::new(vec![vec![1.0, 2.0], vec![1.0]], vec![0.0, 0.0]).unwrap_err();
        assert!(matches!(err, PolicyLoadError::Shape(_)));
        let err = LinearPolicy::new(vec![vec![1.0]], vec![]).unwrap_err();
        assert!(matches!(err, PolicyLoadError::Shape(_)));
    }

    #[test]
    fn http_policy_reports_unreachable_server_as_policy_fault() {
        let policy = HttpPolicy::new("http://127.0.0.1:9/").unwrap();
        assert_eq!(policy.base_url(), "http://127.0.0.1:9");
        let err = policy.predict(&[0.0; 14], true).unwrap_err();
        assert!(matches!(err, ReachError::Policy(_)));
    }
}

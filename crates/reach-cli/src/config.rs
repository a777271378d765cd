//! Configuration – reads/writes `~/.reach/config.toml`.
//!
//! Precedence, lowest first: built-in defaults, the file, `REACH_*`
//! environment variables, command-line flags (applied in `main`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reach_hal::ArmSide;
use reach_runtime::sequencer::DEFAULT_POSES;
use reach_types::{ReachError, Vec3};
use serde::{Deserialize, Serialize};

/// Where actions come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicySource {
    /// Built-in damped-least-squares reaching controller.
    #[default]
    Reaching,
    /// Linear model weights in a JSON file.
    File { path: PathBuf },
    /// External inference server.
    Http { url: String },
}

/// Persisted configuration stored in `~/.reach/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Control period in milliseconds.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    #[serde(default = "default_cockpit_host")]
    pub cockpit_host: String,

    #[serde(default = "default_cockpit_port")]
    pub cockpit_port: u16,

    #[serde(default = "default_arm")]
    pub arm: ArmSide,

    /// Physical output enabled at start.
    #[serde(default)]
    pub robot_output: bool,

    /// Simulation output enabled at start.
    #[serde(default = "default_true")]
    pub sim_output: bool,

    #[serde(default = "default_true")]
    pub run_startup_poses: bool,

    #[serde(default = "default_startup_dwell_ms")]
    pub startup_dwell_ms: u64,

    #[serde(default = "default_startup_poses")]
    pub startup_poses: Vec<[f32; 3]>,

    #[serde(default)]
    pub policy: PolicySource,
}

fn default_period_ms() -> u64 {
    40
}
fn default_cockpit_host() -> String {
    "0.0.0.0".to_string()
}
fn default_cockpit_port() -> u16 {
    8080
}
fn default_arm() -> ArmSide {
    ArmSide::Left
}
fn default_true() -> bool {
    true
}
fn default_startup_dwell_ms() -> u64 {
    1000
}
fn default_startup_poses() -> Vec<[f32; 3]> {
    DEFAULT_POSES.iter().map(|p| p.to_array()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            cockpit_host: default_cockpit_host(),
            cockpit_port: default_cockpit_port(),
            arm: default_arm(),
            robot_output: false,
            sim_output: true,
            run_startup_poses: true,
            startup_dwell_ms: default_startup_dwell_ms(),
            startup_poses: default_startup_poses(),
            policy: PolicySource::default(),
        }
    }
}

impl Config {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn startup_dwell(&self) -> Duration {
        Duration::from_millis(self.startup_dwell_ms)
    }

    pub fn startup_goals(&self) -> Vec<Vec3> {
        self.startup_poses.iter().copied().map(Vec3::from_array).collect()
    }

    /// Reject values the supervisor cannot start with.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Configuration`] for a zero period or dwell, a
    /// non-finite startup pose, a missing policy file or an empty policy URL.
    pub fn validate(&self) -> Result<(), ReachError> {
        if self.period_ms == 0 {
            return Err(ReachError::Configuration("period_ms must be positive".into()));
        }
        if self.run_startup_poses && self.startup_dwell_ms == 0 {
            return Err(ReachError::Configuration(
                "startup_dwell_ms must be positive".into(),
            ));
        }
        if let Some(pose) = self
            .startup_poses
            .iter()
            .find(|p| p.iter().any(|v| !v.is_finite()))
        {
            return Err(ReachError::Configuration(format!(
                "startup pose {pose:?} is not finite"
            )));
        }
        match &self.policy {
            PolicySource::Reaching => {}
            PolicySource::File { path } if !path.is_file() => {
                return Err(ReachError::Configuration(format!(
                    "policy file {} does not exist",
                    path.display()
                )));
            }
            PolicySource::File { .. } => {}
            PolicySource::Http { url } if url.trim().is_empty() => {
                return Err(ReachError::Configuration("policy url is empty".into()));
            }
            PolicySource::Http { .. } => {}
        }
        Ok(())
    }
}

/// Return the path to `~/.reach/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".reach").join("config.toml")
}

/// Load the file at `path`.  Returns `None` if it does not exist.
///
/// # Errors
///
/// Returns [`ReachError::Configuration`] if the file cannot be read or
/// parsed.
pub fn load_from(path: &Path) -> Result<Option<Config>, ReachError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        ReachError::Configuration(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw).map_err(|e| {
        ReachError::Configuration(format!("failed to parse config at {}: {e}", path.display()))
    })?;
    Ok(Some(cfg))
}

/// File (or defaults when absent) with environment overrides applied.
///
/// # Errors
///
/// See [`load_from`].
pub fn effective(path: &Path) -> Result<Config, ReachError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `REACH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `REACH_PERIOD_MS` | `period_ms` |
/// | `REACH_COCKPIT_HOST` | `cockpit_host` |
/// | `REACH_COCKPIT_PORT` | `cockpit_port` |
/// | `REACH_POLICY_PATH` | `policy = file` |
/// | `REACH_POLICY_URL` | `policy = http` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("REACH_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.period_ms = ms;
    }
    if let Ok(v) = std::env::var("REACH_COCKPIT_HOST") {
        cfg.cockpit_host = v;
    }
    if let Ok(v) = std::env::var("REACH_COCKPIT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.cockpit_port = port;
    }
    if let Ok(v) = std::env::var("REACH_POLICY_PATH") {
        cfg.policy = PolicySource::File { path: v.into() };
    }
    if let Ok(v) = std::env::var("REACH_POLICY_URL") {
        cfg.policy = PolicySource::Http { url: v };
    }
}

/// Save to `path`, creating the parent directory if necessary.
///
/// # Errors
///
/// Returns [`ReachError::Configuration`] on any I/O or encoding failure.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), ReachError> {
    let io_err = |what: &str, e: std::io::Error| {
        ReachError::Configuration(format!("{what} {}: {e}", path.display()))
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("cannot create directory for", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("cannot restrict directory of", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| ReachError::Configuration(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err("failed to write config at", e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err("failed to write config at", e))?;
    Ok(())
}

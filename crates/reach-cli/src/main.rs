//! `reach` – real-time arm-motion supervisor
//!
//! This binary wires the whole stack together.  It:
//!
//! 1. Loads `~/.reach/config.toml` (or `--config`), applies `REACH_*`
//!    environment overrides and command-line flags, and refuses to start on
//!    a configuration error.
//! 2. Builds the simulation, the policy and the actuator bus, then binds the
//!    cockpit on a tokio runtime.
//! 3. Starts the control loop on its own thread and, optionally, the startup
//!    pose sequence.
//! 4. Drops the operator into an interactive REPL (or waits, with
//!    `--headless`).  **Ctrl-C** requests a cooperative stop.
//!
//! Exit status: `0` on a clean stop, `1` on a loop fault, `2` on a
//! configuration error.

mod config;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use reach_cockpit::CockpitServer;
use reach_hal::sim::layout;
use reach_hal::{ARM_DOF, ArmModel, ArmSide, HttpPolicy, LinearPolicy, Policy, ReachingPolicy, SimArm, SimBus};
use reach_middleware::EventBus;
use reach_runtime::{ControlLoop, ControlLoopConfig, LoopStats, StartupSequence, init_tracing};
use reach_types::ReachError;
use tracing::{error, info, warn};

use crate::config::{Config, PolicySource};

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "reach", version, about = "Real-time arm-motion supervisor")]
struct Cli {
    /// Config file (default `~/.reach/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control period in milliseconds.
    #[arg(long)]
    period_ms: Option<u64>,

    /// Cockpit bind address.
    #[arg(long)]
    host: Option<String>,

    /// Cockpit port.
    #[arg(long)]
    port: Option<u16>,

    /// Drive the right arm instead of the left.
    #[arg(long)]
    right_arm: bool,

    /// Linear policy weights (JSON).
    #[arg(long, conflicts_with = "policy_url")]
    policy: Option<PathBuf>,

    /// Inference server base URL.
    #[arg(long)]
    policy_url: Option<String>,

    /// Enable physical output at start.
    #[arg(long, conflicts_with = "sim_only")]
    robot: bool,

    /// Keep physical output disabled at start.
    #[arg(long)]
    sim_only: bool,

    /// Skip the startup pose sequence.
    #[arg(long)]
    no_startup_poses: bool,

    /// Run without the REPL until Ctrl-C.
    #[arg(long)]
    headless: bool,

    /// Save the effective configuration before starting.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config::config_path)
    }

    /// Flags win over file and environment.
    fn apply(&self, cfg: &mut Config) {
        if let Some(ms) = self.period_ms {
            cfg.period_ms = ms;
        }
        if let Some(host) = &self.host {
            cfg.cockpit_host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.cockpit_port = port;
        }
        if self.right_arm {
            cfg.arm = ArmSide::Right;
        }
        if let Some(path) = &self.policy {
            cfg.policy = PolicySource::File { path: path.clone() };
        }
        if let Some(url) = &self.policy_url {
            cfg.policy = PolicySource::Http { url: url.clone() };
        }
        if self.robot {
            cfg.robot_output = true;
        }
        if self.sim_only {
            cfg.robot_output = false;
        }
        if self.no_startup_poses {
            cfg.run_startup_poses = false;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing("reach");

    print_banner();

    match run(&cli) {
        Ok(stats) => {
            println!(
                "  {} {} ticks, {} overruns, {} episode resets, {} robot frames",
                "✓".green().bold(),
                stats.ticks,
                stats.overruns,
                stats.episode_resets,
                stats.robot_sends
            );
            ExitCode::SUCCESS
        }
        Err(e @ ReachError::Configuration(_)) => {
            eprintln!("{} {}", "Configuration error:".red().bold(), e);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("{} {}", "Control loop fault:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<LoopStats, ReachError> {
    // ── Configuration ─────────────────────────────────────────────────────
    let path = cli.config_path();
    let mut cfg = config::effective(&path)?;
    cli.apply(&mut cfg);
    cfg.validate()?;

    if cli.write_config {
        config::save_to(&cfg, &path)?;
        println!("  Config saved to {}", path.display().to_string().bold());
    }
    info!(?cfg, "configuration");

    // ── Collaborators ─────────────────────────────────────────────────────
    let policy = build_policy(&cfg)?;
    let bus = Arc::new(EventBus::default());
    let control = ControlLoop::new(
        Box::new(SimArm::new(cfg.arm)),
        policy,
        Box::new(SimBus::new()),
        ControlLoopConfig {
            period: cfg.period(),
            sim_output: cfg.sim_output,
            robot_output: cfg.robot_output,
            ..ControlLoopConfig::default()
        },
    )?
    .with_event_bus((*bus).clone());
    let handle = control.handle();

    // ── Cockpit ───────────────────────────────────────────────────────────
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ReachError::Configuration(format!("cannot start async runtime: {e}")))?;
    let addr = format!("{}:{}", cfg.cockpit_host, cfg.cockpit_port);
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind(&addr))
        .map_err(|e| ReachError::Configuration(format!("cockpit cannot bind {addr}: {e}")))?;
    runtime.spawn(CockpitServer::new(handle.clone(), Arc::clone(&bus)).serve(listener));
    println!(
        "  Cockpit on {}",
        format!("http://{}:{}", cfg.cockpit_host, cfg.cockpit_port).bold()
    );

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let handle = handle.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – stopping the control loop …".yellow().bold());
            handle.request_stop();
            shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    // ── Loop and sequencer ────────────────────────────────────────────────
    let worker = control.spawn()?;
    if cfg.run_startup_poses {
        StartupSequence::new(cfg.startup_goals(), cfg.startup_dwell()).spawn(handle.clone())?;
    }

    if cli.headless {
        while !worker.is_finished() {
            thread::sleep(Duration::from_millis(100));
        }
    } else {
        println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
        repl::run(&handle, Arc::clone(&shutdown));
        handle.request_stop();
    }

    let result = worker
        .join()
        .unwrap_or_else(|_| Err(ReachError::Simulation("control loop thread panicked".into())));
    runtime.shutdown_background();

    if let Err(e) = &result {
        error!(error = %e, "control loop ended with a fault");
        repl::print_status(&handle.status());
    }
    result
}

/// Instantiate the configured policy and check it fits the simulation.
fn build_policy(cfg: &Config) -> Result<Box<dyn Policy>, ReachError> {
    match &cfg.policy {
        PolicySource::Reaching => Ok(Box::new(ReachingPolicy::new(ArmModel::new(cfg.arm)))),
        PolicySource::File { path } => {
            let policy = LinearPolicy::from_file(path)?;
            if policy.input_dim() != layout::DIM || policy.output_dim() != ARM_DOF {
                return Err(ReachError::Configuration(format!(
                    "policy {} maps {} → {}, expected {} → {}",
                    path.display(),
                    policy.input_dim(),
                    policy.output_dim(),
                    layout::DIM,
                    ARM_DOF
                )));
            }
            Ok(Box::new(policy))
        }
        PolicySource::Http { url } => Ok(Box::new(HttpPolicy::new(url.clone())?)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ________  ____ ______/ /_ "#.bold().cyan());
    println!("{}", r#"  / ___/ _ \/ __ `/ ___/ __ \"#.bold().cyan());
    println!("{}", r#" / /  /  __/ /_/ / /__/ / / /"#.bold().cyan());
    println!("{}", r#"/_/   \___/\__,_/\___/_/ /_/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "reach".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Real-time arm-motion supervisor");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "reach",
            "--period-ms",
            "20",
            "--port",
            "9000",
            "--right-arm",
            "--policy-url",
            "http://infer:8500",
            "--robot",
            "--no-startup-poses",
        ]);
        let mut cfg = Config::default();
        cli.apply(&mut cfg);
        assert_eq!(cfg.period_ms, 20);
        assert_eq!(cfg.cockpit_port, 9000);
        assert_eq!(cfg.arm, ArmSide::Right);
        assert!(cfg.robot_output);
        assert!(!cfg.run_startup_poses);
        assert_eq!(
            cfg.policy,
            PolicySource::Http {
                url: "http://infer:8500".into()
            }
        );
    }

    #[test]
    fn no_flags_leave_config_alone() {
        let cli = Cli::parse_from(["reach"]);
        let mut cfg = Config {
            robot_output: true,
            ..Config::default()
        };
        cli.apply(&mut cfg);
        assert_eq!(
            cfg,
            Config {
                robot_output: true,
                ..Config::default()
            }
        );
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        assert!(Cli::try_parse_from(["reach", "--robot", "--sim-only"]).is_err());
        assert!(
            Cli::try_parse_from(["reach", "--policy", "a.json", "--policy-url", "http://x"]).is_err()
        );
    }

    #[test]
    fn mismatched_linear_policy_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("tiny.json");
        std::fs::write(&path, r#"{"weights":[[1.0,0.0]],"bias":[0.0]}"#).unwrap();
        let cfg = Config {
            policy: PolicySource::File { path },
            ..Config::default()
        };
        assert!(matches!(build_policy(&cfg), Err(ReachError::Configuration(_))));
    }

    #[test]
    fn missing_policy_file_is_a_configuration_error() {
        let cfg = Config {
            policy: PolicySource::File {
                path: "/nowhere/model.json".into(),
            },
            ..Config::default()
        };
        assert!(matches!(build_policy(&cfg), Err(ReachError::Configuration(_))));
    }

    #[test]
    fn built_in_policy_needs_no_files() {
        assert!(build_policy(&Config::default()).is_ok());
    }
}

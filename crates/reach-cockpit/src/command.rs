//! Upstream command parsing and application.
//!
//! Commands arrive as flat JSON objects keyed by `topic`:
//!
//! | Topic | Fields | Effect |
//! |---|---|---|
//! | `/goal/set` | `x`, `y`, `z` | absolute goal, clears interlock, arms override |
//! | `/goal/nudge` | `axis`, `delta` | adds `delta` to one axis of the clamped goal |
//! | `/output/robot` | `enabled` | physical output enable |
//! | `/output/sim` | `enabled` | simulation output enable |
//! | `/go` | | clears hold and interlock, arms override |
//! | `/status` | | replies with the status snapshot |
//!
//! Malformed input never reaches the control state; it is answered with an
//! [`Reply::Error`].

use reach_runtime::ControlHandle;
use reach_types::{Axis, ReachError, StatusSnapshot, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "topic")]
pub enum Command {
    #[serde(rename = "/goal/set")]
    SetGoal { x: f32, y: f32, z: f32 },
    #[serde(rename = "/goal/nudge")]
    Nudge { axis: Axis, delta: f32 },
    #[serde(rename = "/output/robot")]
    RobotOutput { enabled: bool },
    #[serde(rename = "/output/sim")]
    SimOutput { enabled: bool },
    #[serde(rename = "/go")]
    Go,
    #[serde(rename = "/status")]
    Status,
}

impl Command {
    pub fn topic(&self) -> &'static str {
        match self {
            Command::SetGoal { .. } => "/goal/set",
            Command::Nudge { .. } => "/goal/nudge",
            Command::RobotOutput { .. } => "/output/robot",
            Command::SimOutput { .. } => "/output/sim",
            Command::Go => "/go",
            Command::Status => "/status",
        }
    }
}

/// One reply per command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ack { topic: String },
    Status(StatusSnapshot),
    Error { message: String },
}

impl From<ReachError> for Reply {
    fn from(err: ReachError) -> Self {
        Reply::Error {
            message: err.to_string(),
        }
    }
}

/// Decode one upstream message.
///
/// # Errors
///
/// Returns [`ReachError::InvalidCommand`] for malformed JSON, an unknown
/// topic, a missing field or an unknown axis.
pub fn parse_command(text: &str) -> Result<Command, ReachError> {
    serde_json::from_str(text).map_err(|e| ReachError::InvalidCommand(format!("bad command: {e}")))
}

/// Apply `command` to the shared control state.
pub fn apply(handle: &ControlHandle, command: Command) -> Reply {
    let topic = command.topic();
    let result = match command {
        Command::SetGoal { x, y, z } => handle.set_goal(Vec3::new(x, y, z)),
        Command::Nudge { axis, delta } => handle.nudge(axis, delta),
        Command::RobotOutput { enabled } => {
            handle.set_robot_output(enabled);
            Ok(())
        }
        Command::SimOutput { enabled } => {
            handle.set_sim_output(enabled);
            Ok(())
        }
        Command::Go => {
            handle.go();
            Ok(())
        }
        Command::Status => return Reply::Status(handle.status()),
    };

    match result {
        Ok(()) => Reply::Ack {
            topic: topic.to_string(),
        },
        Err(e) => {
            debug!(topic, error = %e, "command rejected");
            e.into()
        }
    }
}

/// Parse and apply; parse failures become [`Reply::Error`].
pub fn handle_text(handle: &ControlHandle, text: &str) -> Reply {
    match parse_command(text) {
        Ok(command) => apply(handle, command),
        Err(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use reach_kernel::Watchdog;
    use reach_runtime::OutputFlags;
    use reach_types::Mode;

    fn handle() -> ControlHandle {
        ControlHandle::new(
            Vec3::new(0.2, 0.0, 0.8),
            OutputFlags {
                sim_enabled: true,
                ..OutputFlags::default()
            },
            Watchdog::new(Instant::now(), Duration::from_secs(1)),
        )
    }

    #[test]
    fn parses_every_topic() {
        assert_eq!(
            parse_command(r#"{"topic":"/goal/set","x":0.3,"y":0.1,"z":0.9}"#).unwrap(),
            Command::SetGoal { x: 0.3, y: 0.1, z: 0.9 }
        );
        assert_eq!(
            parse_command(r#"{"topic":"/goal/nudge","axis":"Y","delta":-0.01}"#).unwrap(),
            Command::Nudge { axis: Axis::Y, delta: -0.01 }
        );
        assert_eq!(
            parse_command(r#"{"topic":"/output/robot","enabled":true}"#).unwrap(),
            Command::RobotOutput { enabled: true }
        );
        assert_eq!(
            parse_command(r#"{"topic":"/output/sim","enabled":false}"#).unwrap(),
            Command::SimOutput { enabled: false }
        );
        assert_eq!(parse_command(r#"{"topic":"/go"}"#).unwrap(), Command::Go);
        assert_eq!(parse_command(r#"{"topic":"/status"}"#).unwrap(), Command::Status);
    }

    #[test]
    fn rejects_malformed_input() {
        for text in [
            "not json",
            r#"{"topic":"/warp"}"#,
            r#"{"topic":"/goal/set","x":0.3}"#,
            r#"{"topic":"/goal/nudge","axis":"w","delta":0.1}"#,
            r#"{"x":0.3,"y":0.1,"z":0.9}"#,
        ] {
            assert!(
                matches!(parse_command(text), Err(ReachError::InvalidCommand(_))),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn set_goal_acks_and_releases_hold() {
        let handle = handle();
        assert_eq!(handle.mode(), Mode::Hold);
        let reply = handle_text(&handle, r#"{"topic":"/goal/set","x":0.3,"y":0.1,"z":0.9}"#);
        assert_eq!(
            reply,
            Reply::Ack {
                topic: "/goal/set".into()
            }
        );
        assert_eq!(handle.goal(), Vec3::new(0.3, 0.1, 0.9));
        assert_eq!(handle.mode(), Mode::Run);
    }

    #[test]
    fn overflowing_coordinate_never_reaches_the_goal() {
        let handle = handle();
        let reply = handle_text(&handle, r#"{"topic":"/goal/set","x":1e300,"y":0.1,"z":0.9}"#);
        assert!(matches!(reply, Reply::Error { .. }));
        assert_eq!(handle.goal(), Vec3::new(0.2, 0.0, 0.8));
    }

    #[test]
    fn output_toggles_are_acknowledged() {
        let handle = handle();
        handle_text(&handle, r#"{"topic":"/output/robot","enabled":true}"#);
        handle_text(&handle, r#"{"topic":"/output/sim","enabled":false}"#);
        let outputs = handle.outputs();
        assert!(outputs.robot_enabled);
        assert!(!outputs.sim_enabled);
    }

    #[test]
    fn status_reply_serializes_flat() {
        let handle = handle();
        let json = serde_json::to_value(handle_text(&handle, r#"{"topic":"/status"}"#)).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["mode"], "HOLD");
        assert_eq!(json["out_sim"], true);

        let json = serde_json::to_value(handle_text(&handle, "{")).unwrap();
        assert_eq!(json["type"], "error");
        assert!(json["message"].as_str().unwrap().starts_with("Invalid Command"));
    }
}

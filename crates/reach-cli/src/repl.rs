//! REPL – the interactive operator shell.
//!
//! Supported slash-commands:
//!   /status             – print the status snapshot
//!   /goal x y z         – set an absolute goal
//!   /nudge axis delta   – move the goal along one axis
//!   /robot on|off       – physical output enable
//!   /sim on|off         – simulation output enable
//!   /go                 – clear hold and the collision interlock
//!   /help               – show this list
//!   /quit | /exit       – stop the loop and exit
//!
//! Control commands go through the same [`Command`] path as the cockpit.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use reach_cockpit::{Command, Reply, apply};
use reach_runtime::ControlHandle;
use reach_types::{Axis, StatusSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Control(Command),
    Help,
    Quit,
    Empty,
}

/// Parse one input line.  Errors are user-facing messages.
pub fn parse_line(line: &str) -> Result<Line, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Line::Empty);
    };
    let args: Vec<&str> = words.collect();

    let number = |s: &str| -> Result<f32, String> {
        s.parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("'{s}' is not a finite number"))
    };
    let switch = |args: &[&str]| -> Result<bool, String> {
        match args {
            ["on"] => Ok(true),
            ["off"] => Ok(false),
            _ => Err(format!("usage: {head} on|off")),
        }
    };

    let line = match head {
        "/status" => Line::Control(Command::Status),
        "/go" => Line::Control(Command::Go),
        "/goal" => match args.as_slice() {
            [x, y, z] => Line::Control(Command::SetGoal {
                x: number(*x)?,
                y: number(*y)?,
                z: number(*z)?,
            }),
            _ => return Err("usage: /goal x y z".into()),
        },
        "/nudge" => match args.as_slice() {
            [axis, delta] => Line::Control(Command::Nudge {
                axis: axis.parse::<Axis>().map_err(|e| e.to_string())?,
                delta: number(*delta)?,
            }),
            _ => return Err("usage: /nudge x|y|z delta".into()),
        },
        "/robot" => Line::Control(Command::RobotOutput {
            enabled: switch(args.as_slice())?,
        }),
        "/sim" => Line::Control(Command::SimOutput {
            enabled: switch(args.as_slice())?,
        }),
        "/help" => Line::Help,
        "/quit" | "/exit" => Line::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(line)
}

/// Run until EOF, `/quit`, or `shutdown` is set.
pub fn run(handle: &ControlHandle, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut reported_dead = false;

    loop {
        if shutdown.load(Ordering::SeqCst) || handle.is_stop_requested() {
            break;
        }
        if !reported_dead && !handle.status().loop_alive {
            println!(
                "{} control loop is not running; {} to exit.",
                "⚠".yellow().bold(),
                "/quit".bold()
            );
            reported_dead = true;
        }

        print!("{} ", "reach>".bold().cyan());
        stdout.flush().ok();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        match parse_line(&input) {
            Ok(Line::Empty) => {}
            Ok(Line::Help) => print_help(),
            Ok(Line::Quit) => {
                println!("{}", "Stopping.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(Line::Control(command)) => print_reply(&apply(handle, command)),
            Err(message) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                message,
                "/help".bold()
            ),
        }
    }
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Ack { topic } => println!("  {} {}", "ok".green(), topic.dimmed()),
        Reply::Status(status) => print_status(status),
        Reply::Error { message } => println!("  {} {}", "rejected:".red(), message),
    }
}

pub fn print_status(s: &StatusSnapshot) {
    let mode = match s.mode.trim() {
        "RUN" => s.mode.green().bold(),
        "HOLD" => s.mode.yellow().bold(),
        _ => s.mode.red().bold(),
    };
    let on_off = |b: bool| if b { "on".green() } else { "off".dimmed() };
    println!(
        "  {}  goal ({:.3}, {:.3}, {:.3})  tick {}",
        mode, s.goal[0], s.goal[1], s.goal[2], s.tick
    );
    println!(
        "  sim {}  robot {}  bus {}  loop {}",
        on_off(s.out_sim),
        on_off(s.out_robot),
        if s.robot_ok { "ok".green() } else { "down".red() },
        if s.loop_alive { "alive".green() } else { "disconnected".red() },
    );
}

fn print_help() {
    println!();
    println!("{}", "reach commands".bold().underline());
    println!("  {}             – print status", "/status".bold().cyan());
    println!("  {}        – set an absolute goal (m)", "/goal x y z".bold().cyan());
    println!("  {}  – move the goal along one axis", "/nudge axis delta".bold().cyan());
    println!("  {}       – physical output", "/robot on|off".bold().cyan());
    println!("  {}         – simulation output", "/sim on|off".bold().cyan());
    println!("  {}                 – clear hold and interlock", "/go".bold().cyan());
    println!("  {}         – stop and exit", "/quit  /exit".bold().cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_commands() {
        assert_eq!(
            parse_line("/goal 0.3 0.1 0.9\n").unwrap(),
            Line::Control(Command::SetGoal { x: 0.3, y: 0.1, z: 0.9 })
        );
        assert_eq!(
            parse_line("  /nudge z -0.02").unwrap(),
            Line::Control(Command::Nudge {
                axis: Axis::Z,
                delta: -0.02
            })
        );
        assert_eq!(
            parse_line("/robot on").unwrap(),
            Line::Control(Command::RobotOutput { enabled: true })
        );
        assert_eq!(
            parse_line("/sim off").unwrap(),
            Line::Control(Command::SimOutput { enabled: false })
        );
        assert_eq!(parse_line("/go").unwrap(), Line::Control(Command::Go));
        assert_eq!(parse_line("/status").unwrap(), Line::Control(Command::Status));
    }

    #[test]
    fn parses_shell_commands() {
        assert_eq!(parse_line("").unwrap(), Line::Empty);
        assert_eq!(parse_line("   \n").unwrap(), Line::Empty);
        assert_eq!(parse_line("/help").unwrap(), Line::Help);
        assert_eq!(parse_line("/exit").unwrap(), Line::Quit);
    }

    #[test]
    fn rejects_bad_input() {
        for line in [
            "/goal 0.3 0.1",
            "/goal 0.3 nan 0.9",
            "/goal 0.3 inf 0.9",
            "/nudge w 0.1",
            "/nudge x",
            "/robot maybe",
            "/sim",
            "/warp 9",
            "status",
        ] {
            assert!(parse_line(line).is_err(), "{line} should be rejected");
        }
    }
}

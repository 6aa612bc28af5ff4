//! REPL – Read-Eval-Print Loop for the CrewSafe operator shell.
//!
//! Supported slash-commands:
//!   /help                     – show this list
//!   /status                   – latest detector snapshot and motion state
//!   /context                  – the decision context handed to the agent
//!   /mode <m>                 – normal | precision | approach
//!   /forward … /strafe-right  – submit a motion through the gate
//!   /stop                     – halt and cancel the active motion
//!   /sim …                    – manipulate the simulated world
//!   /config                   – print the effective configuration
//!   /quit | /exit             – gracefully exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crewsafe_hal::sim::SimWorld;
use crewsafe_middleware::{Topic, TopicReceiver};
use crewsafe_runtime::{SafetyCore, StatusReport};
use crewsafe_types::{
    Direction, EventPayload, MotionOutcome, MotionRequest, OperatingMode, RangeZone, Side,
};
use tokio::runtime::Handle;

use crate::config::{self, Config};

/// Default magnitude for linear moves, in metres.
const DEFAULT_LINEAR_M: f32 = 0.3;
/// Default magnitude for turns, in degrees.
const DEFAULT_TURN_DEG: f32 = 30.0;

// ─────────────────────────────────────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeSetting {
    Distance(f32),
    NoTarget,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimCommand {
    Obstacle(Side),
    Clear,
    Range(RangeSetting),
    Camera { online: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Status,
    Context,
    Mode(OperatingMode),
    Move {
        direction: Direction,
        magnitude: Option<f32>,
    },
    Stop,
    Sim(SimCommand),
    Config,
    Quit,
}

fn parse_direction(cmd: &str) -> Option<Direction> {
    Some(match cmd {
        "/forward" | "/w" => Direction::Forward,
        "/backward" | "/s" => Direction::Backward,
        "/left" | "/a" => Direction::Left,
        "/right" | "/d" => Direction::Right,
        "/strafe-left" => Direction::StrafeLeft,
        "/strafe-right" => Direction::StrafeRight,
        _ => return None,
    })
}

fn parse_sim(args: &[&str]) -> Result<SimCommand, String> {
    match args {
        ["obstacle"] | ["obstacle", "center"] => Ok(SimCommand::Obstacle(Side::Center)),
        ["obstacle", "left"] => Ok(SimCommand::Obstacle(Side::Left)),
        ["obstacle", "right"] => Ok(SimCommand::Obstacle(Side::Right)),
        ["clear"] => Ok(SimCommand::Clear),
        ["range", "none"] => Ok(SimCommand::Range(RangeSetting::NoTarget)),
        ["range", "offline"] => Ok(SimCommand::Range(RangeSetting::Offline)),
        ["range", cm] => cm
            .parse::<f32>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| SimCommand::Range(RangeSetting::Distance(d)))
            .ok_or_else(|| format!("invalid distance '{cm}'")),
        ["camera", "on"] => Ok(SimCommand::Camera { online: true }),
        ["camera", "off"] => Ok(SimCommand::Camera { online: false }),
        _ => Err("usage: /sim obstacle [left|center|right] | clear | range <cm|none|offline> | camera on|off".into()),
    }
}

/// Parse one input line.  `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    if let Some(direction) = parse_direction(head) {
        let magnitude = match args.as_slice() {
            [] => None,
            [m] => Some(
                m.parse::<f32>()
                    .map_err(|_| format!("invalid magnitude '{m}'"))?,
            ),
            _ => return Err(format!("usage: {head} [magnitude]")),
        };
        return Ok(Some(ReplCommand::Move {
            direction,
            magnitude,
        }));
    }

    let cmd = match (head, args.as_slice()) {
        ("/help", []) => ReplCommand::Help,
        ("/status", []) => ReplCommand::Status,
        ("/context", []) => ReplCommand::Context,
        ("/mode", [m]) => ReplCommand::Mode(m.parse().map_err(|e| format!("{e}"))?),
        ("/mode", _) => return Err("usage: /mode normal|precision|approach".into()),
        ("/stop", []) | ("/x", []) => ReplCommand::Stop,
        ("/sim", rest) => ReplCommand::Sim(parse_sim(rest)?),
        ("/config", []) => ReplCommand::Config,
        ("/quit", []) | ("/exit", []) => ReplCommand::Quit,
        _ => return Err(format!("Unknown command '{line}'")),
    };
    Ok(Some(cmd))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a REPL command can touch.
pub struct Session {
    pub core: Arc<SafetyCore>,
    pub handle: Handle,
    pub world: SimWorld,
    pub config: Config,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(session: &Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut alerts = session.core.bus().subscribe_to(Topic::SafetyAlerts);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        drain_alerts(&mut alerts);
        print!("{} ", "crewsafe>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let cmd = match parse_command(line.trim()) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("{} Type {} for available commands.", e.red(), "/help".bold());
                continue;
            }
        };

        match cmd {
            ReplCommand::Help => cmd_help(),
            ReplCommand::Status => print_status(&session.core.status()),
            ReplCommand::Context => println!("{}", session.core.agent_context().text),
            ReplCommand::Mode(mode) => {
                let previous = session.core.set_mode(mode);
                println!("  mode {} → {}", previous.to_string().dimmed(), mode.to_string().bold());
            }
            ReplCommand::Move {
                direction,
                magnitude,
            } => cmd_move(session, direction, magnitude),
            ReplCommand::Stop => {
                let outcome = session
                    .handle
                    .block_on(session.core.submit(MotionRequest::stop()));
                print_outcome(&outcome);
            }
            ReplCommand::Sim(sim) => cmd_sim(&session.world, sim),
            ReplCommand::Config => match config::to_toml(&session.config) {
                Ok(raw) => println!("{raw}"),
                Err(e) => println!("{}: {}", "Config error".red(), e),
            },
            ReplCommand::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "CrewSafe Commands".bold().underline());
    println!("  {}        – detector snapshot and motion state", "/status".bold().cyan());
    println!("  {}       – decision context for the agent", "/context".bold().cyan());
    println!("  {}      – normal | precision | approach", "/mode <m>".bold().cyan());
    println!("  {}   – move (metres)", "/forward /backward [m]".bold().cyan());
    println!("  {}        – turn in place (degrees)", "/left /right [deg]".bold().cyan());
    println!("  {} – strafe (metres)", "/strafe-left /strafe-right [m]".bold().cyan());
    println!("  {}          – halt immediately", "/stop".bold().cyan());
    println!("  {}           – obstacle [side] | clear | range <cm|none|offline> | camera on|off", "/sim".bold().cyan());
    println!("  {}        – effective configuration", "/config".bold().cyan());
    println!("  {}  – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_move(session: &Session, direction: Direction, magnitude: Option<f32>) {
    let magnitude = magnitude.unwrap_or(if direction.is_turn() {
        DEFAULT_TURN_DEG
    } else {
        DEFAULT_LINEAR_M
    });
    let mode = session.core.state().mode();
    let request = MotionRequest::new(direction, mode, magnitude);
    println!(
        "  {} {} {:.2} in {} mode ({:.1}s)",
        "→".cyan(),
        direction.to_string().bold(),
        magnitude,
        mode,
        request.duration().as_secs_f32()
    );
    let outcome = session.handle.block_on(session.core.submit(request));
    print_outcome(&outcome);
}

fn cmd_sim(world: &SimWorld, cmd: SimCommand) {
    match cmd {
        SimCommand::Obstacle(side) => {
            let (w, h) = world.size();
            let (start, end) = match side {
                Side::Left => (w / 10, w * 3 / 10),
                Side::Right => (w * 7 / 10, w * 9 / 10),
                _ => (w * 2 / 5, w * 3 / 5),
            };
            world.place_obstacle(start, end, h / 2, h.saturating_sub(1));
            println!("  {} obstacle placed ({side:?})", "✓".green());
        }
        SimCommand::Clear => {
            world.clear_obstacles();
            println!("  {} obstacles cleared", "✓".green());
        }
        SimCommand::Range(RangeSetting::Distance(cm)) => {
            world.set_range_offline(false);
            world.set_range(Some(cm));
            println!("  {} range target at {cm:.0} cm", "✓".green());
        }
        SimCommand::Range(RangeSetting::NoTarget) => {
            world.set_range_offline(false);
            world.set_range(None);
            println!("  {} range target removed", "✓".green());
        }
        SimCommand::Range(RangeSetting::Offline) => {
            world.set_range_offline(true);
            println!("  {} range sensor offline", "⚠".yellow());
        }
        SimCommand::Camera { online } => {
            world.set_camera_offline(!online);
            if online {
                println!("  {} camera online", "✓".green());
            } else {
                println!("  {} camera offline", "⚠".yellow());
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_status(status: &StatusReport) {
    println!();
    println!("{}", "Safety Status".bold().underline());
    let path = if !status.vision_ok {
        "UNKNOWN (no fresh vision)".yellow().bold()
    } else if status.blocked {
        format!("BLOCKED ({:?})", status.verdict.side).red().bold()
    } else {
        "clear".green().bold()
    };
    println!("  Forward path : {path}");
    println!(
        "  Mode         : {} (applied {})",
        status.mode.to_string().bold(),
        status.applied_mode
    );
    let range = match status.range_cm {
        Some(cm) => format!("{cm:.0} cm"),
        None => "-".into(),
    };
    let zone = match status.range_zone {
        RangeZone::Stop => "stop".red(),
        RangeZone::Caution => "caution".yellow(),
        RangeZone::Clear => "clear".green(),
        RangeZone::Unavailable => "unavailable".dimmed(),
    };
    println!("  Range        : {range} ({zone})");
    println!("  Gap          : {:?}", status.gap.guidance);
    println!(
        "  Motion       : {} (last {})",
        status
            .active_motion
            .map(|d| d.to_string())
            .unwrap_or_else(|| "idle".into()),
        status
            .last_motion
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".into())
    );
    println!(
        "  Snapshot     : v{} ({} ms old)",
        status.version, status.snapshot_age_ms
    );
    println!();
}

fn print_outcome(outcome: &MotionOutcome) {
    match outcome {
        MotionOutcome::Completed {
            direction,
            elapsed_ms,
        } => println!("  {} {direction} completed in {elapsed_ms} ms", "✓".green().bold()),
        MotionOutcome::StoppedEarly {
            direction,
            reason,
            elapsed_ms,
        } => println!(
            "  {} {direction} stopped early after {elapsed_ms} ms: {reason}",
            "⚠".yellow().bold()
        ),
        MotionOutcome::Stopped { direction } => {
            println!("  {} {direction} stopped", "■".yellow().bold())
        }
        MotionOutcome::Rejected { direction, reason } => {
            println!("  {} {direction} rejected: {reason}", "✗".red().bold())
        }
    }
}

fn drain_alerts(alerts: &mut TopicReceiver) {
    while let Ok(event) = alerts.try_recv() {
        match event.payload {
            EventPayload::ReflexTrip { direction, reason } => println!(
                "  {} reflex trip during {direction}: {reason}",
                "⚠".red().bold()
            ),
            EventPayload::SensorFault { component, message } => println!(
                "  {} sensor fault on {}: {message}",
                "⚠".yellow().bold(),
                component.bold()
            ),
            _ => {}
        }
    }
}

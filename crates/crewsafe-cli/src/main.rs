//! `crewsafe-cli` – CrewSafe Command Line Interface
//!
//! This binary is the entry point for running the safety core against the
//! simulated robot.  It:
//!
//! 1. Loads `~/.crewsafe/config.toml`, writing the defaults on first run.
//!    An invalid configuration is fatal.
//! 2. Starts the [`SafetyCore`] (perception thread plus motion gate) and the
//!    cockpit HTTP/WebSocket endpoint.
//! 3. Drops the operator into an **interactive REPL** with slash-commands.
//! 4. Intercepts **Ctrl-C** to submit a `stop` through the gate and exit
//!    safely.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use crewsafe_cockpit::CockpitServer;
use crewsafe_hal::RangeSensor;
use crewsafe_hal::sim::{SimCamera, SimDrive, SimRangeSensor, SimWorld};
use crewsafe_middleware::EventBus;
use crewsafe_runtime::{Hardware, SafetyCore, TelemetryConfig, init_tracing};
use crewsafe_types::MotionRequest;

use crate::config::{Config, SensingMode};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); CREWSAFE_LOG_FORMAT=json switches to
    // JSON lines; OTEL_EXPORTER_OTLP_ENDPOINT enables span export.
    let _telemetry = init_tracing(&TelemetryConfig::from_env("crewsafe"));

    print_banner();

    let cfg = load_config();

    // ── Hardware (simulated) ──────────────────────────────────────────────
    let world = SimWorld::new(cfg.sim.width, cfg.sim.height);
    let range: Option<Box<dyn RangeSensor>> = match cfg.safety.sensing_mode {
        SensingMode::Hybrid => Some(Box::new(SimRangeSensor::new("front_range", world.clone()))),
        SensingMode::VisionOnly => None,
    };
    let hardware = Hardware {
        camera: Box::new(SimCamera::new("front_camera", world.clone())),
        range,
        drive: Box::new(SimDrive::new("wheel_base")),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("crewsafe-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build async runtime");
            std::process::exit(1);
        }
    };
    let handle = runtime.handle().clone();

    let core = match SafetyCore::start(&cfg.safety.core_config(), hardware, EventBus::default()) {
        Ok(core) => Arc::new(core),
        Err(e) => {
            println!("{}: {}", "Failed to start safety core".red(), e);
            std::process::exit(1);
        }
    };

    // ── Cockpit endpoint ──────────────────────────────────────────────────
    let cockpit = CockpitServer::new(Arc::clone(&core)).with_port(cfg.cockpit_port);
    runtime.spawn(async move {
        if let Err(e) = cockpit.run().await {
            error!(error = %e, "cockpit server stopped");
        }
    });
    println!(
        "  Cockpit at {}",
        format!("http://localhost:{}/", cfg.cockpit_port).bold()
    );
    println!(
        "  Sensing mode {}, reflex poll {} Hz",
        cfg.safety.sensing_mode.to_string().bold(),
        cfg.safety.reflex_poll_hz()
    );

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let core_ctrlc = Arc::clone(&core);
    let handle_ctrlc = handle.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        handle_ctrlc.block_on(core_ctrlc.submit(MotionRequest::stop()));
        println!("{}", "  ✓ Drive stopped.".green());
        println!("{}", "  ✓ Press Enter to exit CrewSafe.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let session = repl::Session {
        core,
        handle,
        world,
        config: cfg,
    };
    repl::run(&session, shutdown);

    session
        .handle
        .block_on(session.core.submit(MotionRequest::stop()));
    session.core.shutdown();
    drop(session);
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            if let Err(e) = cfg.safety.validate() {
                println!("{}: {}", "Config error".red(), e);
                std::process::exit(1);
            }
            match config::save(&Config::default()) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Fix {} and restart.", config::config_path().display());
            std::process::exit(1);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______                 _____        ____    "#.bold().cyan());
    println!("{}", r#"  / ____/_______ _      _/ ___/____ _ / __/__  "#.bold().cyan());
    println!("{}", r#" / /   / ___/ _ \ | /| / \__ \/ __ `// /_/ _ \ "#.bold().cyan());
    println!("{}", r#"/ /___/ /  /  __/ |/ |/ /__/ / /_/ // __/  __/ "#.bold().cyan());
    println!("{}", r#"\____/_/   \___/|__/|__/____/\__,_//_/  \___/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "CrewSafe".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Perception and motion safety core");
    println!();
}

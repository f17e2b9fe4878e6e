//! CLI entry point for igs device sessions
//!
//! Provides command-line interface for:
//! - Running a configured session and logging tool poses
//! - Exporting the session and tool state machines as Graphviz DOT
//! - Listing the registered device drivers
//!
//! # Usage
//!
//! Run a session for ten seconds:
//! ```bash
//! igs-session run --config crates/igs-bin/config/session.toml --seconds 10
//! ```
//!
//! Render the session state machine:
//! ```bash
//! igs-session describe session | dot -Tsvg > session.svg
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use igs_controller::{logging, AppConfig, SessionController, StrategyRegistry};
use igs_core::{DeviceSession, Tool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "igs-session")]
#[command(about = "Run and inspect tracker and imager device sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up a configured session, stream, then shut down
    Run {
        /// Session configuration file (TOML format)
        #[arg(long)]
        config: PathBuf,

        /// How long to stream
        #[arg(long, default_value = "10")]
        seconds: u64,

        /// Interval between pose reports in milliseconds
        #[arg(long, default_value = "1000")]
        report_ms: u64,
    },

    /// Print a state machine as Graphviz DOT
    Describe {
        /// Which state machine
        #[arg(value_enum)]
        machine: Machine,

        /// Also draw the InvalidRequest self-loops
        #[arg(long)]
        invalid: bool,
    },

    /// List registered device drivers
    Drivers,
}

#[derive(Clone, Copy, ValueEnum)]
enum Machine {
    Session,
    Tool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            seconds,
            report_ms,
        } => run_session(
            config,
            Duration::from_secs(seconds),
            Duration::from_millis(report_ms.max(1)),
        ),
        Commands::Describe { machine, invalid } => {
            let dot = match machine {
                Machine::Session => DeviceSession::state_machine_dot(invalid),
                Machine::Tool => Tool::state_machine_dot(invalid),
            };
            println!("{dot}");
            Ok(())
        }
        Commands::Drivers => {
            let registry = StrategyRegistry::with_simulated_devices();
            for driver in registry.list_factories() {
                if let Some(info) = registry.factory_info(&driver) {
                    println!("{:<16} {}", info.driver_type, info.name);
                }
            }
            Ok(())
        }
    }
}

fn run_session(path: PathBuf, duration: Duration, report_every: Duration) -> Result<()> {
    let config = AppConfig::load_from(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    logging::init_from_config(&config)?;
    info!(
        application = %config.application.name,
        driver = %config.device.driver,
        "Starting session"
    );

    let controller = SessionController::new(Arc::new(StrategyRegistry::with_simulated_devices()));
    controller.initialize(
        &config.device,
        Some(Arc::new(|fraction: f64| {
            info!(percent = fraction * 100.0, "Connecting");
        })),
    )?;
    controller.start()?;

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        std::thread::sleep(report_every.min(deadline.saturating_duration_since(Instant::now())));
        for tool in controller.attached_tools() {
            let id = tool.id().unwrap_or_default();
            if let Some(frame) = tool.frame() {
                info!(
                    tool = %id,
                    width = frame.width,
                    height = frame.height,
                    "Video frame"
                );
            } else if let Some(pose) = tool.transform().filter(|_| tool.is_tracked()) {
                info!(tool = %id, translation = ?pose.translation(), "Tool pose");
            } else {
                info!(tool = %id, state = ?tool.state(), "Tool not tracked");
            }
        }
    }

    let stats = controller.session()?.acquisition_stats();
    info!(
        fetches = stats.fetches,
        failed = stats.failures,
        watchdog_trips = controller.watchdog_trips(),
        "Streaming finished"
    );
    if let Err(e) = controller.shutdown() {
        warn!(error = %e, "Shutdown reported a failure");
        return Err(e.into());
    }
    Ok(())
}

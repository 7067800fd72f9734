//! Paperclip - Animated Agent Player
//!
//! Entry point for the `paperclip` command. Loads one or more agent
//! bundles and plays them on the LED display, a pixelflut canvas, the local
//! terminal, or to terminal viewers over TCP.
//!
//! # Usage
//!
//! ```bash
//! # Play Clippy's greeting in this terminal
//! paperclip -t
//!
//! # List the animations of an agent
//! paperclip -a Rover --list
//!
//! # Rotate through agents on the display and a pixelflut canvas
//! paperclip -e -d -p --target 10.0.0.7:1234@100,40,160,120 -a Clippy,Rover,Merlin
//!
//! # Serve random animations to `nc host 2323` viewers
//! paperclip --serve --bind 0.0.0.0:2323 --lifetime 120
//!
//! # Verbose logging
//! RUST_LOG=debug paperclip -t
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Stop playback, or stop accepting viewers

mod runner;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use paperclip_core::config::{
    load_config, load_config_from_path, parse_terminal_size, ConfigOverrides, PixelTarget,
};
use paperclip_core::render::TerminalGeometry;
use tracing::{error, info};

use runner::{Mode, RunOptions};

/// Paperclip - play desktop-assistant agents on displays and terminals
#[derive(Parser, Debug)]
#[command(name = "paperclip")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Animation to play once
    #[arg(default_value = "Greeting")]
    action: String,

    /// Agent name(s), comma separated
    #[arg(short = 'a', long, default_value = "Clippy", value_delimiter = ',')]
    agent: Vec<String>,

    /// Directory holding agent bundles
    #[arg(long, value_name = "DIR")]
    agents_dir: Option<PathBuf>,

    /// List the animations of the selected agents and exit
    #[arg(short = 'l', long)]
    list: bool,

    /// Rotate through the agents until stopped
    #[arg(short = 'e', long, conflicts_with = "serve")]
    endless: bool,

    /// Send frames to the LED display
    #[arg(short = 'd', long)]
    display: bool,

    /// Draw frames in this terminal
    #[arg(short = 't', long)]
    terminal: bool,

    /// Draw frames on the pixelflut canvas
    #[arg(short = 'p', long)]
    pixelflut: bool,

    /// Pixelflut target
    #[arg(long, value_name = "HOST:PORT[@X,Y[,W,H[,REPS]]]")]
    target: Option<PixelTarget>,

    /// Serve animations to terminal viewers over TCP
    #[arg(short = 's', long)]
    serve: bool,

    /// Terminal size for rendering
    #[arg(long, value_name = "COLSxROWS", value_parser = parse_terminal_size)]
    size: Option<TerminalGeometry>,

    /// Seconds each agent plays in endless mode
    #[arg(short = 'w', long, value_name = "SECS")]
    wait: Option<u64>,

    /// Seconds a viewer session lasts
    #[arg(long, value_name = "SECS")]
    lifetime: Option<u64>,

    /// Listen address for --serve
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Deliver frames without waiting out their durations
    #[arg(long)]
    no_sleep: bool,

    /// Read single-letter commands from stdin (d, t, p, n, q, ?)
    #[arg(short = 'i', long)]
    interactive: bool,

    /// Configuration file path
    #[arg(short = 'c', long, env = "PAPERCLIP_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PAPERCLIP_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// CLI values that override the config file and environment
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(dir) = &self.agents_dir {
            overrides = overrides.with_agents_dir(dir.clone());
        }
        if let Some(target) = &self.target {
            overrides = overrides.with_pixel(target.clone());
        }
        if let Some(size) = self.size {
            overrides = overrides.with_terminal(size);
        }
        if let Some(bind) = &self.bind {
            overrides = overrides.with_bind(bind.clone());
        }
        if let Some(secs) = self.lifetime {
            overrides = overrides.with_lifetime(Duration::from_secs(secs));
        }
        if let Some(secs) = self.wait {
            overrides = overrides.with_wait(Duration::from_secs(secs));
        }
        overrides
    }

    fn mode(&self) -> Mode {
        if self.list {
            Mode::List
        } else if self.serve {
            Mode::Serve
        } else if self.endless {
            Mode::Endless
        } else {
            Mode::Single {
                animation: self.action.clone(),
            }
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            agents: self.agent.clone(),
            mode: self.mode(),
            display: self.display,
            terminal: self.terminal,
            pixel: self.pixelflut,
            size_given: self.size.is_some(),
            no_sleep: self.no_sleep,
            interactive: self.interactive,
        }
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr; stdout belongs to the terminal output.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "paperclip_daemon={level},paperclip_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Paperclip starting");

    let mut config = match &args.config {
        Some(path) => load_config_from_path(Some(path)),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        agents_dir = %config.agents_dir.display(),
        source = %config.source(),
        "Configuration resolved"
    );

    match runner::run(args.run_options(), config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "Paperclip stopped with error");
            Err(e)
        }
    }
}

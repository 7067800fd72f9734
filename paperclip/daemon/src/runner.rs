//! Run modes
//!
//! Wires the core together for one invocation: load the agents, precompute
//! every frame for the selected outputs, then hand over to the scheduler or
//! the session server until playback ends or a signal arrives.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use paperclip_core::agent::{agent_path, AgentDefinition, AgentError};
use paperclip_core::cache::{FrameCache, SinkConfig};
use paperclip_core::config::PaperclipConfig;
use paperclip_core::render::TerminalGeometry;
use paperclip_core::scheduler::{
    DeliveryScheduler, Outputs, Pacing, PlayOutcome, SchedulerCommand, SchedulerHandle, SinkKind,
};
use paperclip_core::server::SessionServer;
use paperclip_core::sinks::{DisplaySink, PixelSink, PixelflutClient, TerminalSink};
use tracing::{debug, info, warn};

/// What this invocation does
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Print animation names
    List,
    /// Play one animation per agent, once
    Single {
        /// Animation name
        animation: String,
    },
    /// Rotate through the agents until stopped
    Endless,
    /// Serve terminal viewers over TCP
    Serve,
}

/// Options taken from the command line
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub agents: Vec<String>,
    pub mode: Mode,
    pub display: bool,
    pub terminal: bool,
    pub pixel: bool,
    /// Terminal size was given explicitly; don't query the terminal
    pub size_given: bool,
    pub no_sleep: bool,
    pub interactive: bool,
}

/// Run one invocation to completion
///
/// # Errors
///
/// Fails when an agent is missing or malformed, an output cannot be set up,
/// or playback hits an unknown animation.
pub async fn run(options: RunOptions, config: PaperclipConfig) -> Result<()> {
    let agents = load_agents(&config.agents_dir, &options.agents).await?;

    match &options.mode {
        Mode::List => {
            print!("{}", animation_listing(&agents));
            Ok(())
        }
        Mode::Serve => serve(agents, &config).await,
        Mode::Single { .. } | Mode::Endless => play_local(&options, agents, &config).await,
    }
}

/// Load every named agent on a blocking thread
async fn load_agents(agents_dir: &Path, names: &[String]) -> Result<Vec<Arc<AgentDefinition>>> {
    let mut agents = Vec::with_capacity(names.len());
    for name in names {
        let dir = agent_path(agents_dir, name);
        let agent = tokio::task::spawn_blocking(move || AgentDefinition::load(&dir))
            .await
            .context("Agent loader panicked")?;
        match agent {
            Ok(agent) => agents.push(Arc::new(agent)),
            Err(AgentError::NotFound(dir)) => {
                anyhow::bail!("Agent '{name}' not found at {}", dir.display())
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to load agent '{name}'")),
        }
    }
    Ok(agents)
}

/// One animation name per line; agents separated by a header when several
fn animation_listing(agents: &[Arc<AgentDefinition>]) -> String {
    let mut out = String::new();
    for agent in agents {
        if agents.len() > 1 {
            out.push_str(&format!("{}:\n", agent.name()));
        }
        for name in agent.animation_names() {
            out.push_str(name);
            out.push('\n');
        }
    }
    out
}

/// Terminal size for local output
fn local_terminal_geometry(options: &RunOptions, config: &PaperclipConfig) -> TerminalGeometry {
    if options.size_given {
        return config.terminal;
    }
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => TerminalGeometry {
            cols: u32::from(cols),
            rows: u32::from(rows),
        },
        _ => {
            debug!(fallback = ?config.terminal, "Terminal size unavailable");
            config.terminal
        }
    }
}

/// Which encodings the local outputs need
fn local_sink_config(
    options: &RunOptions,
    config: &PaperclipConfig,
    terminal: TerminalGeometry,
) -> SinkConfig {
    // No output selected: draw in the terminal.
    let terminal_on = options.terminal || !(options.display || options.pixel);
    SinkConfig {
        display: options.display.then_some(config.display),
        terminal: terminal_on.then_some(terminal),
        pixel: options.pixel.then_some(config.pixel.geometry),
    }
}

async fn play_local(
    options: &RunOptions,
    agents: Vec<Arc<AgentDefinition>>,
    config: &PaperclipConfig,
) -> Result<()> {
    let sink_config = local_sink_config(options, config, local_terminal_geometry(options, config));

    let mut pixel = sink_config.pixel.map(|geometry| {
        PixelSink::new(
            Box::new(PixelflutClient::new()),
            config.pixel.host.clone(),
            config.pixel.port,
            geometry,
            config.pixel.reps,
        )
    });

    let mut caches = Vec::with_capacity(agents.len());
    for agent in agents {
        let mut cache = FrameCache::new(agent);
        cache
            .precompute(&sink_config, pixel.as_mut().map(|sink| sink.client_mut()))
            .with_context(|| format!("Failed to encode frames of '{}'", cache.agent().name()))?;
        caches.push(Arc::new(cache));
    }

    let mut outputs = Outputs::new();
    if sink_config.display.is_some() {
        let display = DisplaySink::connect(&config.display_host, config.display_port)
            .await
            .with_context(|| {
                format!("Failed to set up display at {}:{}", config.display_host, config.display_port)
            })?;
        outputs = outputs.with_display(display);
    }
    if let Some(pixel) = pixel {
        outputs = outputs.with_pixel(pixel);
    }
    if sink_config.terminal.is_some() {
        outputs = outputs.with_terminal(TerminalSink::stdout());
    }

    let pacing = if options.no_sleep {
        Pacing::NoSleep
    } else {
        Pacing::RealTime
    };
    let (mut scheduler, handle) = DeliveryScheduler::new(outputs, sink_config, pacing);

    let signals = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signals.send(SchedulerCommand::Stop);
    });
    if options.interactive {
        spawn_interactive(handle.clone());
    }

    let result = match &options.mode {
        Mode::Single { animation } => {
            let mut result = Ok(());
            for cache in &caches {
                match scheduler.play_once(cache, animation).await {
                    Ok(PlayOutcome::Stopped) => break,
                    Ok(_) => {}
                    Err(e) => {
                        result = Err(e).with_context(|| {
                            format!("Cannot play '{animation}' of '{}'", cache.agent().name())
                        });
                        break;
                    }
                }
            }
            result
        }
        _ => scheduler
            .run_rotation(&caches, &config.rotation)
            .await
            .context("Rotation failed"),
    };

    scheduler.outputs().lock().await.shutdown().await;
    let status = handle.status();
    info!(frames = status.frames_delivered, "Playback finished");
    result
}

async fn serve(agents: Vec<Arc<AgentDefinition>>, config: &PaperclipConfig) -> Result<()> {
    let sink_config = config.server.sink_config();
    let mut caches = Vec::with_capacity(agents.len());
    for agent in agents {
        let mut cache = FrameCache::new(agent);
        cache.precompute(&sink_config, None)?;
        caches.push(Arc::new(cache));
    }

    let server = SessionServer::bind(&config.server, caches).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.shutdown();
    });

    server.run().await;
    Ok(())
}

/// Map an interactive input line to a scheduler command
fn parse_command(line: &str) -> Option<SchedulerCommand> {
    match line.trim() {
        "d" => Some(SchedulerCommand::Toggle(SinkKind::Display)),
        "t" => Some(SchedulerCommand::Toggle(SinkKind::Terminal)),
        "p" => Some(SchedulerCommand::Toggle(SinkKind::Pixel)),
        "n" => Some(SchedulerCommand::NextAgent),
        "q" => Some(SchedulerCommand::Stop),
        _ => None,
    }
}

fn spawn_interactive(handle: SchedulerHandle) {
    // Plain thread: a pending stdin read must not hold up runtime shutdown.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim() == "?" {
                let status = handle.status();
                info!(
                    agent = status.agent.as_deref().unwrap_or("-"),
                    animation = status.animation.as_deref().unwrap_or("-"),
                    frames = status.frames_delivered,
                    "Status"
                );
                continue;
            }
            let Some(command) = parse_command(&line) else {
                warn!(input = line.trim(), "Unknown command (d, t, p, n, q, ?)");
                continue;
            };
            if !handle.send(command) || command == SchedulerCommand::Stop {
                break;
            }
        }
    });
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, stopping"),
                    _ = sigterm.recv() => info!("Received SIGTERM, stopping"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to wait for SIGINT");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT, stopping");
}

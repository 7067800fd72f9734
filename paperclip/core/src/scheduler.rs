//! Delivery Scheduler
//!
//! Drives playback for the local outputs (display, pixel service, local
//! terminal). Two modes:
//!
//! - **Single shot**: play one animation of one agent, once
//! - **Rotation**: cycle through agents, giving each a wall-clock budget;
//!   within the budget, each tick plays a random animation or (with the
//!   configured probability) idles
//!
//! # Shared state
//!
//! All sink writes go through one async mutex around [`Outputs`], so a frame
//! is never interleaved with another writer. Reconfiguration (toggling
//! outputs, skipping agents, stopping) arrives as [`SchedulerCommand`]
//! messages. Frame waits and deliveries race the command channel, so a
//! command takes effect at once, even while a sink is stuck reconnecting.
//! Frame waits in rotation are clamped to the agent's budget. The current
//! [`PlaybackStatus`]
//! is published behind a read-write lock for whoever holds a
//! [`SchedulerHandle`].
//!
//! ```text
//!   SchedulerHandle ──commands──► DeliveryScheduler ──lock──► Outputs
//!         ▲                              │                    ├─ DisplaySink
//!         └────────── status ◄───────────┘                    ├─ PixelSink
//!                                                             └─ TerminalSink
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::cache::{CacheError, EncodedFrame, FrameCache, SinkConfig};
use crate::engine::{AnimationEngine, EngineError, RngDraws};
use crate::sinks::{DisplaySink, PixelSink, SinkError, TerminalSink};

/// Probability that a rotation tick idles instead of playing
pub const DEFAULT_SKIP_PROBABILITY: f64 = 0.2;

/// Pause between rotation ticks
pub const DEFAULT_IDLE_PAUSE: Duration = Duration::from_secs(1);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that stop the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Requested animation does not exist
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Frame was not precomputed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Local terminal went away
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Rotation started without any agent
    #[error("No agents to rotate through")]
    NoAgents,
}

// =============================================================================
// Outputs
// =============================================================================

/// The sinks the scheduler can write to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// LED display
    Display,
    /// Pixel service
    Pixel,
    /// Local terminal
    Terminal,
}

/// Sinks plus their on/off switches
#[derive(Default)]
pub struct Outputs {
    display: Option<DisplaySink>,
    pixel: Option<PixelSink>,
    terminal: Option<TerminalSink>,
    display_on: bool,
    pixel_on: bool,
    terminal_on: bool,
}

impl Outputs {
    /// No sinks attached
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach and enable the display
    #[must_use]
    pub fn with_display(mut self, sink: DisplaySink) -> Self {
        self.display = Some(sink);
        self.display_on = true;
        self
    }

    /// Attach and enable the pixel service
    #[must_use]
    pub fn with_pixel(mut self, sink: PixelSink) -> Self {
        self.pixel = Some(sink);
        self.pixel_on = true;
        self
    }

    /// Attach and enable the terminal
    #[must_use]
    pub fn with_terminal(mut self, sink: TerminalSink) -> Self {
        self.terminal = Some(sink);
        self.terminal_on = true;
        self
    }

    /// Whether a sink is attached and switched on
    #[must_use]
    pub fn is_enabled(&self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::Display => self.display.is_some() && self.display_on,
            SinkKind::Pixel => self.pixel.is_some() && self.pixel_on,
            SinkKind::Terminal => self.terminal.is_some() && self.terminal_on,
        }
    }

    /// Flip a sink's switch; returns the new state
    pub fn toggle(&mut self, kind: SinkKind) -> bool {
        let flag = match kind {
            SinkKind::Display => &mut self.display_on,
            SinkKind::Pixel => &mut self.pixel_on,
            SinkKind::Terminal => &mut self.terminal_on,
        };
        *flag = !*flag;
        self.is_enabled(kind)
    }

    /// Send one frame to every enabled sink, in a fixed order
    ///
    /// # Errors
    ///
    /// Only terminal write failures are reported.
    pub async fn deliver(&mut self, frame: &EncodedFrame) -> Result<(), SinkError> {
        if self.terminal_on {
            if let (Some(sink), Some(text)) = (self.terminal.as_mut(), frame.terminal.as_deref()) {
                sink.send_frame(text).await?;
            }
        }
        if self.display_on {
            if let (Some(sink), Some(bits)) = (self.display.as_ref(), frame.display.as_deref()) {
                sink.send_frame(bits).await;
            }
        }
        if self.pixel_on {
            if let (Some(sink), Some(image)) = (self.pixel.as_mut(), frame.pixel) {
                sink.send_frame(image).await;
            }
        }
        Ok(())
    }

    /// Close connections held by the sinks
    pub async fn shutdown(&mut self) {
        if let Some(pixel) = self.pixel.as_mut() {
            pixel.disconnect().await;
        }
    }
}

// =============================================================================
// Commands and Status
// =============================================================================

/// Reconfiguration request applied between frames
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Switch a sink on or off
    Toggle(SinkKind),
    /// Abandon the current agent and rotate to the next one
    NextAgent,
    /// Stop playback
    Stop,
}

/// Snapshot of what is playing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    /// Current agent
    pub agent: Option<String>,
    /// Current animation
    pub animation: Option<String>,
    /// Frames handed to the sinks so far
    pub frames_delivered: u64,
}

/// Control side of a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    status: Arc<RwLock<PlaybackStatus>>,
}

impl SchedulerHandle {
    /// Queue a command; returns false if the scheduler is gone
    pub fn send(&self, command: SchedulerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Current playback status
    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        self.status.read().clone()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Whether to wait out frame durations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Sleep for each frame's duration
    #[default]
    RealTime,
    /// Deliver frames back to back
    NoSleep,
}

/// Rotation timing
#[derive(Clone, Debug, PartialEq)]
pub struct RotationConfig {
    /// Wall-clock budget per agent
    pub wait: Duration,
    /// Chance of a tick idling instead of playing
    pub skip_probability: f64,
    /// Pause between ticks
    pub idle_pause: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(300),
            skip_probability: DEFAULT_SKIP_PROBABILITY,
            idle_pause: DEFAULT_IDLE_PAUSE,
        }
    }
}

/// How a single animation run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Ran to its last frame
    Completed,
    /// The agent's budget ran out mid-animation
    Deadline,
    /// A `NextAgent` command arrived
    NextAgent,
    /// A `Stop` command arrived
    Stopped,
}

/// Real-time playback loop for the local outputs
pub struct DeliveryScheduler {
    outputs: Arc<Mutex<Outputs>>,
    config: SinkConfig,
    pacing: Pacing,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    status: Arc<RwLock<PlaybackStatus>>,
    rng: StdRng,
}

impl DeliveryScheduler {
    /// Create a scheduler and its control handle
    ///
    /// `config` must match the configuration the caches were precomputed
    /// with.
    #[must_use]
    pub fn new(outputs: Outputs, config: SinkConfig, pacing: Pacing) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(PlaybackStatus::default()));
        let scheduler = Self {
            outputs: Arc::new(Mutex::new(outputs)),
            config,
            pacing,
            commands: rx,
            status: Arc::clone(&status),
            rng: StdRng::from_entropy(),
        };
        let handle = SchedulerHandle {
            commands: tx,
            status,
        };
        (scheduler, handle)
    }

    /// Use a seeded RNG for animation and branch choices
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Shared outputs, e.g. to close them after playback
    #[must_use]
    pub fn outputs(&self) -> Arc<Mutex<Outputs>> {
        Arc::clone(&self.outputs)
    }

    /// Play `animation` of the cache's agent once
    ///
    /// # Errors
    ///
    /// Fails on an unknown animation, a missing cache entry, or a terminal
    /// write failure.
    pub async fn play_once(
        &mut self,
        cache: &FrameCache,
        animation: &str,
    ) -> Result<PlayOutcome, SchedulerError> {
        self.status.write().agent = Some(cache.agent().name().to_string());
        self.play(cache, animation, None).await
    }

    /// Rotate through `caches` until stopped
    ///
    /// # Errors
    ///
    /// Fails with `NoAgents` on an empty list, or on cache and terminal
    /// errors during playback.
    pub async fn run_rotation(
        &mut self,
        caches: &[Arc<FrameCache>],
        rotation: &RotationConfig,
    ) -> Result<(), SchedulerError> {
        if caches.is_empty() {
            return Err(SchedulerError::NoAgents);
        }

        for cache in caches.iter().cycle() {
            let agent = cache.agent();
            let deadline = Instant::now() + rotation.wait;
            self.status.write().agent = Some(agent.name().to_string());
            tracing::info!(agent = agent.name(), wait = ?rotation.wait, "Rotating to agent");

            let names = agent.animation_names();
            loop {
                match self.apply_commands().await {
                    Some(PlayOutcome::Stopped) => return Ok(()),
                    Some(PlayOutcome::NextAgent) => break,
                    _ => {}
                }
                if Instant::now() >= deadline {
                    break;
                }

                if self.rng.gen::<f64>() < rotation.skip_probability {
                    tracing::debug!(agent = agent.name(), "Idle tick");
                } else if let Some(name) = names.choose(&mut self.rng).copied() {
                    match self.play(cache, name, Some(deadline)).await? {
                        PlayOutcome::Completed => {}
                        PlayOutcome::Deadline | PlayOutcome::NextAgent => break,
                        PlayOutcome::Stopped => return Ok(()),
                    }
                }

                match self
                    .wait_until(deadline.min(Instant::now() + rotation.idle_pause))
                    .await
                {
                    Some(PlayOutcome::Stopped) => return Ok(()),
                    Some(_) => break,
                    None => {}
                }
            }
        }
        Ok(())
    }

    async fn play(
        &mut self,
        cache: &FrameCache,
        animation: &str,
        deadline: Option<Instant>,
    ) -> Result<PlayOutcome, SchedulerError> {
        let agent = Arc::clone(cache.agent());
        let draws = RngDraws(StdRng::seed_from_u64(self.rng.gen()));
        let mut engine = AnimationEngine::new(&agent, draws);
        let playback = engine.play(animation)?;

        tracing::info!(agent = agent.name(), animation, "Playing");
        self.status.write().animation = Some(animation.to_string());

        for (index, frame) in playback {
            if let Some(outcome) = self.apply_commands().await {
                return Ok(outcome);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::debug!(agent = agent.name(), animation, index, "Agent budget spent");
                return Ok(PlayOutcome::Deadline);
            }

            if let Some(image_ref) = frame.image_ref {
                let encoded = cache.lookup(image_ref, &self.config)?;
                if let Some(outcome) = self.deliver(&encoded).await? {
                    return Ok(outcome);
                }
                self.status.write().frames_delivered += 1;
            }
            tracing::trace!(animation, index, duration_ms = frame.duration_ms, "Frame");

            // Frame pacing, clamped to the agent budget
            let frame_end = Instant::now() + Duration::from_millis(frame.duration_ms);
            let until = deadline.map_or(frame_end, |d| frame_end.min(d));
            if let Some(outcome) = self.wait_until(until).await {
                return Ok(outcome);
            }
        }
        Ok(PlayOutcome::Completed)
    }

    /// Hand one frame to the outputs while still listening for commands
    ///
    /// A command arriving mid-delivery cuts that frame short, so a sink stuck
    /// reconnecting never blocks `Stop`.
    async fn deliver(
        &mut self,
        frame: &EncodedFrame,
    ) -> Result<Option<PlayOutcome>, SchedulerError> {
        let outputs = Arc::clone(&self.outputs);
        let delivery = async move { outputs.lock().await.deliver(frame).await };
        tokio::select! {
            result = delivery => {
                result?;
                Ok(None)
            }
            Some(command) = self.commands.recv() => Ok(self.handle_command(command).await),
        }
    }

    /// Apply queued commands; returns an outcome if playback must stop
    async fn apply_commands(&mut self) -> Option<PlayOutcome> {
        while let Ok(command) = self.commands.try_recv() {
            if let Some(outcome) = self.handle_command(command).await {
                return Some(outcome);
            }
        }
        None
    }

    async fn handle_command(&mut self, command: SchedulerCommand) -> Option<PlayOutcome> {
        match command {
            SchedulerCommand::Toggle(kind) => {
                let on = self.outputs.lock().await.toggle(kind);
                tracing::info!(sink = ?kind, enabled = on, "Output toggled");
                None
            }
            SchedulerCommand::NextAgent => Some(PlayOutcome::NextAgent),
            SchedulerCommand::Stop => Some(PlayOutcome::Stopped),
        }
    }

    /// Wait until `until`, applying commands as they arrive
    ///
    /// Returns early with an outcome on `NextAgent` or `Stop`. Without
    /// real-time pacing only already queued commands are applied.
    async fn wait_until(&mut self, until: Instant) -> Option<PlayOutcome> {
        if self.pacing == Pacing::NoSleep {
            return self.apply_commands().await;
        }
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(until) => return None,
                Some(command) = self.commands.recv() => {
                    if let Some(outcome) = self.handle_command(command).await {
                        return Some(outcome);
                    }
                }
            }
        }
    }
}

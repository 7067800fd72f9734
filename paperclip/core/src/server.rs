//! Session Server
//!
//! TCP server that streams animations to terminal viewers (`nc host port`).
//! Each accepted connection gets its own task:
//!
//! 1. Pick an agent uniformly at random
//! 2. Loop: pick a random animation, play it with real frame pacing, writing
//!    the terminal payload of each frame
//! 3. Stop when the session lifetime is reached or the viewer goes away
//!
//! # Lifetime
//!
//! The lifetime cap is checked at every frame boundary, and every frame wait
//! is clamped to the deadline. A session therefore never ends before the cap
//! and never writes a frame after it.
//!
//! # Registry
//!
//! Active sessions are tracked in a [`DashMap`] keyed by [`SessionId`].
//! Shutdown goes through a `watch` channel that stops the accept loop and
//! ends running sessions at their next wait.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::cache::{CacheError, FrameCache, SinkConfig};
use crate::engine::{AnimationEngine, EngineError, RngDraws};
use crate::render::TerminalGeometry;
use crate::sinks::write_frame;

/// Default session lifetime
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(300);

// =============================================================================
// Identifiers and Errors
// =============================================================================

/// Unique identifier for a viewer session
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a random 64-bit session ID
    #[must_use]
    pub fn new() -> Self {
        let bytes: [u8; 8] = rand::thread_rng().gen();
        Self(format!("sess_{}", hex::encode(bytes)))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the registry knows about a session
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Viewer address
    pub peer: SocketAddr,
    /// Agent being played
    pub agent: String,
    /// Accept time
    pub started: Instant,
}

/// Why a session ended normally
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Lifetime cap reached
    Lifetime,
    /// Write to the viewer failed
    Disconnected,
    /// Server shutting down
    Shutdown,
}

/// Errors from the session server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Server started without any agent
    #[error("No agents to serve")]
    NoAgents,

    /// Animation lookup failed inside a session
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Frame was not precomputed for the session geometry
    #[error(transparent)]
    Cache(#[from] CacheError),
}

// =============================================================================
// Server
// =============================================================================

/// Server settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Session lifetime cap
    pub lifetime: Duration,
    /// Viewer terminal size
    pub geometry: TerminalGeometry,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:2323".to_string(),
            lifetime: DEFAULT_LIFETIME,
            geometry: TerminalGeometry::default(),
        }
    }
}

impl ServerConfig {
    /// Cache configuration sessions look frames up with
    #[must_use]
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig::terminal_only(self.geometry)
    }
}

/// Stops a running [`SessionServer`]
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Stop accepting and end active sessions
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

/// Task-per-connection animation server
pub struct SessionServer {
    listener: TcpListener,
    caches: Arc<Vec<Arc<FrameCache>>>,
    sink_config: SinkConfig,
    lifetime: Duration,
    sessions: Arc<DashMap<SessionId, SessionInfo>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionServer {
    /// Bind the listener
    ///
    /// The caches must already be precomputed for
    /// [`ServerConfig::sink_config`].
    ///
    /// # Errors
    ///
    /// Fails on an empty cache list or if the address cannot be bound.
    pub async fn bind(
        config: &ServerConfig,
        caches: Vec<Arc<FrameCache>>,
    ) -> Result<Self, ServerError> {
        if caches.is_empty() {
            return Err(ServerError::NoAgents);
        }
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind.clone(),
                source,
            })?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            listener,
            caches: Arc::new(caches),
            sink_config: config.sink_config(),
            lifetime: config.lifetime,
            sessions: Arc::new(DashMap::new()),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    /// Bound address
    ///
    /// # Errors
    ///
    /// Propagates the OS error if the address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared view of active sessions
    #[must_use]
    pub fn sessions(&self) -> Arc<DashMap<SessionId, SessionInfo>> {
        Arc::clone(&self.sessions)
    }

    /// Handle that stops the server
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Accept connections until shut down
    pub async fn run(self) {
        let mut shutdown = self.shutdown_rx.clone();
        tracing::info!(
            addr = ?self.listener.local_addr().ok(),
            agents = self.caches.len(),
            lifetime = ?self.lifetime,
            "Session server listening"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                }
            }
        }

        tracing::info!(active = self.sessions.len(), "Session server stopped");
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let id = SessionId::new();
        let Some(cache) = self.caches.choose(&mut rand::thread_rng()).cloned() else {
            return;
        };
        let sink_config = self.sink_config;
        let lifetime = self.lifetime;
        let sessions = Arc::clone(&self.sessions);
        let shutdown = self.shutdown_rx.clone();

        sessions.insert(
            id.clone(),
            SessionInfo {
                peer,
                agent: cache.agent().name().to_string(),
                started: Instant::now(),
            },
        );
        tracing::debug!(session = %id, %peer, agent = cache.agent().name(), "Session started");

        tokio::spawn(async move {
            let mut stream = stream;
            let result = run_session(&mut stream, &cache, &sink_config, lifetime, shutdown).await;
            sessions.remove(&id);
            match result {
                Ok(end) => tracing::debug!(session = %id, ?end, "Session ended"),
                Err(e) => tracing::error!(session = %id, error = %e, "Session failed"),
            }
        });
    }
}

// =============================================================================
// Session Loop
// =============================================================================

/// Stream random animations of one agent to `writer`
///
/// # Errors
///
/// Returns an error only when a frame is missing from the cache or an
/// animation cannot be started; viewer disconnects end the session normally.
pub async fn run_session<W>(
    writer: &mut W,
    cache: &FrameCache,
    sink_config: &SinkConfig,
    lifetime: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SessionEnd, ServerError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let deadline = Instant::now() + lifetime;
    let agent = cache.agent();
    let names = agent.animation_names();
    let mut picker = StdRng::from_entropy();
    let mut engine = AnimationEngine::new(agent, RngDraws(StdRng::from_entropy()));

    loop {
        let Some(name) = names.choose(&mut picker).copied() else {
            // Nothing to play: wait out the lifetime.
            tokio::time::sleep_until(deadline).await;
            return Ok(SessionEnd::Lifetime);
        };
        let mut played = false;

        for (_, frame) in engine.play(name)? {
            if Instant::now() >= deadline {
                return Ok(SessionEnd::Lifetime);
            }

            if let Some(image_ref) = frame.image_ref {
                let encoded = cache.lookup(image_ref, sink_config)?;
                if let Some(text) = encoded.terminal.as_deref() {
                    if write_frame(writer, text).await.is_err() {
                        return Ok(SessionEnd::Disconnected);
                    }
                }
            }

            let frame_end = Instant::now() + Duration::from_millis(frame.duration_ms);
            tokio::select! {
                () = tokio::time::sleep_until(frame_end.min(deadline)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
            played |= frame.duration_ms > 0;
        }

        if !played {
            // Zero-length animation: avoid spinning.
            tokio::time::sleep_until(deadline.min(Instant::now() + Duration::from_millis(100))).await;
        }
    }
}

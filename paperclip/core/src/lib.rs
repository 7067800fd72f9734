//! Paperclip Core - Animated Agent Playback
//!
//! This crate plays desktop-assistant style animated agents on several
//! outputs at once: a networked LED display, a pixelflut canvas, the local
//! terminal, and any number of terminal viewers connected over TCP. It has
//! no dependency on a particular front end; the `paperclip` daemon is one
//! caller.
//!
//! # Architecture
//!
//! ```text
//!   agent.json + map.png
//!          │
//!          ▼
//!   ┌──────────────────┐      ┌──────────────────┐
//!   │ AgentDefinition  │─────►│ AnimationEngine  │  frame graph walk
//!   └────────┬─────────┘      └────────┬─────────┘
//!            │                         │ (index, frame)
//!            ▼                         ▼
//!   ┌──────────────────┐      ┌──────────────────┐      ┌──────────────┐
//!   │   FrameCache     │─────►│ DeliveryScheduler│─────►│   Outputs    │
//!   │ (ImageRef,       │      │  single / rotate │      │ display/pixel│
//!   │  SinkConfig)     │      └──────────────────┘      │  /terminal   │
//!   └────────┬─────────┘                                └──────────────┘
//!            │                ┌──────────────────┐
//!            └───────────────►│  SessionServer   │─────► TCP viewers
//!                             └──────────────────┘
//! ```
//!
//! Every frame is encoded once per output configuration before playback
//! starts; the playback loops only look up and send bytes.
//!
//! # Module Overview
//!
//! - [`agent`]: Agent bundle loading and the frame graph data model
//! - [`engine`]: Transition rules and animation playback
//! - [`render`]: Per-sink frame encoders
//! - [`cache`]: Precomputed per-sink payloads
//! - [`sinks`]: Display, pixel service and terminal transports
//! - [`scheduler`]: Real-time playback for the local outputs
//! - [`server`]: TCP streaming to terminal viewers
//! - [`config`]: TOML, environment and CLI configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod cache;
pub mod config;
pub mod engine;
pub mod render;
pub mod scheduler;
pub mod server;
pub mod sinks;

// Re-exports for convenience
pub use agent::{
    agent_path, AgentDefinition, AgentError, Frame, FrameSize, ImageRef, Transition,
    WeightedBranch,
};
pub use cache::{CacheError, EncodedFrame, FrameCache, PrecomputeStats, SinkConfig};
pub use engine::{AnimationEngine, DrawSource, EngineError, Playback, RngDraws};
pub use render::{DisplayGeometry, PixelGeometry, TerminalGeometry};
pub use scheduler::{
    DeliveryScheduler, Outputs, Pacing, PlayOutcome, PlaybackStatus, RotationConfig,
    SchedulerCommand, SchedulerError, SchedulerHandle, SinkKind,
};
pub use server::{
    run_session, ServerConfig, ServerError, SessionEnd, SessionId, SessionInfo, SessionServer,
    ShutdownHandle,
};
pub use sinks::{
    DisplaySink, PixelClient, PixelError, PixelRef, PixelSink, PixelflutClient, SinkError,
    TerminalSink,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, parse_terminal_size,
    ConfigError, ConfigOverrides, ConfigSource, PaperclipConfig, PixelTarget,
};

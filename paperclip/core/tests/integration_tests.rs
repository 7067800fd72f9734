//! Integration tests for bundle loading, precomputation and local playback
//!
//! These tests go from an on-disk agent bundle through the frame cache to
//! the scheduler's terminal output.

mod common;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use paperclip_core::agent::{agent_path, AgentDefinition, AgentError};
use paperclip_core::cache::{FrameCache, SinkConfig};
use paperclip_core::render::{DisplayGeometry, TerminalGeometry, CURSOR_HOME};
use paperclip_core::scheduler::{DeliveryScheduler, Outputs, Pacing, PlayOutcome};
use paperclip_core::sinks::TerminalSink;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for Capture {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn terminal_config() -> SinkConfig {
    SinkConfig {
        display: Some(DisplayGeometry::default()),
        terminal: Some(TerminalGeometry { cols: 4, rows: 2 }),
        pixel: None,
    }
}

#[test]
fn test_bundle_loads_with_legacy_keys() {
    let dir = tempfile::tempdir().unwrap();
    common::write_bundle(dir.path(), "Clippy", 50);

    let agent = AgentDefinition::load(&agent_path(dir.path(), "Clippy")).unwrap();
    assert_eq!(agent.name(), "Clippy");
    assert_eq!(agent.animation_names(), vec!["Greeting", "Idle"]);
    assert_eq!(agent.animation("Greeting").unwrap().len(), 4);
}

#[test]
fn test_unknown_agent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let err = AgentDefinition::load(&agent_path(dir.path(), "Rover")).unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
}

#[test]
fn test_precompute_encodes_each_image_once() {
    let dir = tempfile::tempdir().unwrap();
    common::write_bundle(dir.path(), "Clippy", 50);
    let agent = Arc::new(AgentDefinition::load(&agent_path(dir.path(), "Clippy")).unwrap());

    let mut cache = FrameCache::new(agent);
    let stats = cache.precompute(&terminal_config(), None).unwrap();
    assert_eq!(stats.images, 2);
    assert_eq!(cache.encode_count(), 2);

    cache.precompute(&terminal_config(), None).unwrap();
    assert_eq!(cache.encode_count(), 2);
}

#[tokio::test]
async fn test_single_shot_plays_through_exit_branch() {
    let dir = tempfile::tempdir().unwrap();
    common::write_bundle(dir.path(), "Clippy", 50);
    let agent = Arc::new(AgentDefinition::load(&agent_path(dir.path(), "Clippy")).unwrap());
    let mut cache = FrameCache::new(agent);
    cache.precompute(&terminal_config(), None).unwrap();

    let capture = Capture::default();
    let outputs = Outputs::new().with_terminal(TerminalSink::new(Box::new(capture.clone())));
    let (mut scheduler, handle) =
        DeliveryScheduler::new(outputs, terminal_config(), Pacing::NoSleep);

    let outcome = scheduler.play_once(&cache, "Greeting").await.unwrap();
    assert_eq!(outcome, PlayOutcome::Completed);

    // Frames 0, 1, 2 carry images; frame 3 is silent.
    let text = String::from_utf8(capture.0.lock().clone()).unwrap();
    assert_eq!(text.matches(CURSOR_HOME).count(), 3);
    assert!(text.contains("38;2;255;0;0"));
    assert!(text.contains("38;2;0;0;255"));
    assert_eq!(handle.status().frames_delivered, 3);
}

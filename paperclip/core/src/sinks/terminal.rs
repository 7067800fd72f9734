//! Terminal Sink
//!
//! Terminal payloads are complete redraws that start with a cursor-home
//! escape, so writing one is all it takes to show a frame. There is no
//! retry: a failed write means the viewer is gone.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write one encoded frame and flush it
///
/// # Errors
///
/// Returns the underlying write error.
pub async fn write_frame<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}

/// Terminal output owned by the delivery scheduler
pub struct TerminalSink {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl TerminalSink {
    /// Write frames to `writer`
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self { writer }
    }

    /// Write frames to the process's standard output
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }

    /// Show one frame
    ///
    /// # Errors
    ///
    /// Returns the underlying write error.
    pub async fn send_frame(&mut self, text: &str) -> io::Result<()> {
        write_frame(self.writer.as_mut(), text).await
    }
}

impl std::fmt::Debug for TerminalSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSink").finish_non_exhaustive()
    }
}

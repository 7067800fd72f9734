//! Pixel Service Sink
//!
//! Draws frames on a shared remote canvas speaking the pixelflut text
//! protocol (`PX <x> <y> <rrggbb>\n` per pixel over TCP).
//!
//! The remote side is best effort: connections drop and pixels get
//! overdrawn by other clients. [`PixelSink`] therefore repeats every frame
//! `reps` times and treats any send failure as "disconnected": it drops the
//! connection, waits a second, and reconnects before the next attempt,
//! forever.
//!
//! [`PixelClient`] is the seam between the sink and the wire. Images are
//! stored in the client up front and referred to by [`PixelRef`] when
//! sending.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::render::PixelGeometry;

/// Maximum number of images a client keeps
pub const MAX_STORED_IMAGES: usize = 2048;

/// Pause before each reconnect attempt
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Commands are flushed to the socket in chunks of about this size
const CHUNK_BYTES: usize = 1400;

/// Longest possible `PX` line for coordinates below 10^4
const MAX_LINE_BYTES: usize = "PX 9999 9999 ffffff\n".len();

/// Opaque handle to an image stored in a [`PixelClient`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelRef(pub usize);

/// Errors raised by a pixel client
#[derive(Debug, Error)]
pub enum PixelError {
    /// No connection is open
    #[error("Not connected")]
    NotConnected,

    /// Socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The image table is full
    #[error("Image store full ({max} images)")]
    StoreFull {
        /// Table capacity
        max: usize,
    },

    /// Buffer length does not match the declared size
    #[error("Expected {expected} RGBA bytes, got {actual}")]
    SizeMismatch {
        /// `width * height * 4`
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Reference does not name a stored image
    #[error("Unknown image {0:?}")]
    UnknownImage(PixelRef),
}

/// The four operations of a pixel-drawing service client
#[async_trait]
pub trait PixelClient: Send {
    /// Open a connection, replacing any previous one
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), PixelError>;

    /// Keep a copy of an RGBA image for later sends
    fn store_image(&mut self, rgba: &[u8], width: u32, height: u32)
        -> Result<PixelRef, PixelError>;

    /// Draw a stored image with its top-left corner at `(x, y)`
    async fn send_frame(
        &mut self,
        image: PixelRef,
        width: u32,
        height: u32,
        x: u32,
        y: u32,
    ) -> Result<(), PixelError>;

    /// Close the connection
    async fn disconnect(&mut self);
}

struct StoredImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

/// Native pixelflut client over TCP
#[derive(Default)]
pub struct PixelflutClient {
    stream: Option<TcpStream>,
    images: Vec<StoredImage>,
}

impl PixelflutClient {
    /// Client with no connection and an empty image table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored images
    #[must_use]
    pub fn stored(&self) -> usize {
        self.images.len()
    }
}

/// Render the pixelflut commands drawing the top-left `width` x `height`
/// pixels of an image with row length `stride` at `(ox, oy)`
///
/// Pixels are walked column by column; anything not fully opaque is skipped.
/// Returns chunks no longer than [`CHUNK_BYTES`].
fn commands(rgba: &[u8], stride: u32, width: u32, height: u32, ox: u32, oy: u32) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::with_capacity(CHUNK_BYTES);
    for x in 0..width {
        for y in 0..height {
            let offset = (y as usize * stride as usize + x as usize) * 4;
            let Some(px) = rgba.get(offset..offset + 4) else {
                continue;
            };
            let (r, g, b, a) = (px[0], px[1], px[2], px[3]);
            if a != 255 {
                continue;
            }
            current.push_str(&format!("PX {} {} {r:02x}{g:02x}{b:02x}\n", ox + x, oy + y));
            if current.len() > CHUNK_BYTES - MAX_LINE_BYTES - 1 {
                chunks.push(std::mem::replace(&mut current, String::with_capacity(CHUNK_BYTES)));
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl PixelClient for PixelflutClient {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), PixelError> {
        tracing::info!(host, port, "Connecting to pixel service");
        self.stream = None;
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn store_image(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<PixelRef, PixelError> {
        if self.images.len() >= MAX_STORED_IMAGES {
            return Err(PixelError::StoreFull {
                max: MAX_STORED_IMAGES,
            });
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(PixelError::SizeMismatch {
                expected,
                actual: rgba.len(),
            });
        }
        self.images.push(StoredImage {
            width,
            height,
            rgba: rgba.to_vec(),
        });
        Ok(PixelRef(self.images.len() - 1))
    }

    async fn send_frame(
        &mut self,
        image: PixelRef,
        width: u32,
        height: u32,
        x: u32,
        y: u32,
    ) -> Result<(), PixelError> {
        let stored = self
            .images
            .get(image.0)
            .ok_or(PixelError::UnknownImage(image))?;
        let stream = self.stream.as_mut().ok_or(PixelError::NotConnected)?;
        let width = width.min(stored.width);
        let height = height.min(stored.height);
        for chunk in commands(&stored.rgba, stored.width, width, height, x, y) {
            stream.write_all(chunk.as_bytes()).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "Pixel service shutdown failed");
            }
        }
    }
}

/// Delivery wrapper: placement, repetition and reconnect policy
pub struct PixelSink {
    client: Box<dyn PixelClient>,
    host: String,
    port: u16,
    geometry: PixelGeometry,
    reps: u32,
    backoff: Duration,
    connected: bool,
}

impl PixelSink {
    /// Wrap `client`; the first send connects lazily
    pub fn new(
        client: Box<dyn PixelClient>,
        host: impl Into<String>,
        port: u16,
        geometry: PixelGeometry,
        reps: u32,
    ) -> Self {
        Self {
            client,
            host: host.into(),
            port,
            geometry,
            reps,
            backoff: RECONNECT_BACKOFF,
            connected: false,
        }
    }

    /// Override the reconnect pause
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Target rectangle
    #[must_use]
    pub fn geometry(&self) -> PixelGeometry {
        self.geometry
    }

    /// Access the client, e.g. to store images before playback starts
    pub fn client_mut(&mut self) -> &mut dyn PixelClient {
        self.client.as_mut()
    }

    /// Whether a connection is currently believed open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Draw a stored image `reps` times, reconnecting as needed
    ///
    /// Never fails: connection loss is retried with a fixed backoff until
    /// the service comes back.
    pub async fn send_frame(&mut self, image: PixelRef) {
        let PixelGeometry {
            x,
            y,
            width,
            height,
        } = self.geometry;
        for _ in 0..self.reps {
            while !self.connected {
                // Reconnect backoff
                tokio::time::sleep(self.backoff).await;
                match self.client.connect(&self.host, self.port).await {
                    Ok(()) => self.connected = true,
                    Err(e) => {
                        tracing::warn!(host = %self.host, port = self.port, error = %e, "Pixel service connect failed");
                    }
                }
            }
            if let Err(e) = self.client.send_frame(image, width, height, x, y).await {
                tracing::debug!(error = %e, "Pixel service send failed, reconnecting");
                self.client.disconnect().await;
                self.connected = false;
            }
        }
    }

    /// Close the connection
    pub async fn disconnect(&mut self) {
        self.client.disconnect().await;
        self.connected = false;
    }
}

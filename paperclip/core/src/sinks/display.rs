//! LED Display Sink
//!
//! The display listens for UDP datagrams carrying a 10-byte header followed
//! by a bzip2 stream of the 1-bit frame:
//!
//! ```text
//! u16 command = 18 | u16 0 | u16 0 | u16 magic = 0x627a | u16 0
//! ```
//!
//! All fields are big-endian. The display never answers, so every frame is
//! sent twice back to back.

use std::io::{self, Write};
use std::net::SocketAddr;

use bzip2::write::BzEncoder;
use bzip2::Compression;
use tokio::net::UdpSocket;

/// Command code for "draw the whole panel"
pub const CMD_LED_DRAW: u16 = 18;

/// Magic value the display firmware checks for
pub const DISPLAY_MAGIC: u16 = 0x627a;

/// Length of the packet header
pub const HEADER_LEN: usize = 10;

/// Copies of each datagram sent per frame
pub const SEND_COPIES: usize = 2;

/// Build the header for a draw command
#[must_use]
pub fn header() -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    for (slot, field) in out
        .chunks_exact_mut(2)
        .zip([CMD_LED_DRAW, 0, 0, DISPLAY_MAGIC, 0])
    {
        slot.copy_from_slice(&field.to_be_bytes());
    }
    out
}

/// Header followed by the bzip2-compressed frame bits
///
/// # Errors
///
/// Returns an IO error if the compressor fails.
pub fn packet(bits: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(header().to_vec(), Compression::best());
    encoder.write_all(bits)?;
    encoder.finish()
}

/// UDP sender for the LED display
#[derive(Debug)]
pub struct DisplaySink {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl DisplaySink {
    /// Resolve `host:port` and bind an ephemeral local socket
    ///
    /// # Errors
    ///
    /// Fails if the address does not resolve or no local socket can be bound.
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let destination = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {host}:{port}"))
            })?;
        let local = if destination.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(local).await?;
        tracing::info!(%destination, "Display sink ready");
        Ok(Self {
            socket,
            destination,
        })
    }

    /// Where frames are sent
    #[must_use]
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Send one frame, twice
    ///
    /// Failures are not reported: the display protocol has no
    /// acknowledgement, so a lost datagram and a failed send look the same.
    pub async fn send_frame(&self, bits: &[u8]) {
        let packet = match packet(bits) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compress display frame");
                return;
            }
        };
        for _ in 0..SEND_COPIES {
            if let Err(e) = self.socket.send_to(&packet, self.destination).await {
                tracing::trace!(error = %e, destination = %self.destination, "Display send failed");
            }
        }
    }
}

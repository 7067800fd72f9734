//! Encoded Frame Cache
//!
//! Every frame image is encoded once per sink configuration, before any
//! playback starts. After [`FrameCache::precompute`] the cache is only read,
//! so it can be shared behind an `Arc` by the scheduler and every viewer
//! session without locking.
//!
//! # Keys
//!
//! Entries are keyed by atlas coordinates plus the [`SinkConfig`] they were
//! encoded for. A cache belongs to exactly one agent, so equal coordinates
//! in different agents never collide.
//!
//! # Memory
//!
//! Nothing is evicted. The number of entries is bounded by the distinct
//! coordinates the agent uses times the configurations precomputed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::agent::{AgentDefinition, ImageRef};
use crate::render::{
    self, DisplayGeometry, GammaTable, PixelGeometry, TerminalGeometry, DISPLAY_GAMMA,
};
use crate::sinks::pixel::{PixelClient, PixelError, PixelRef};

/// Which sinks to encode for, and at what geometry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SinkConfig {
    /// LED display panel
    pub display: Option<DisplayGeometry>,
    /// Terminal character grid
    pub terminal: Option<TerminalGeometry>,
    /// Pixel service rectangle
    pub pixel: Option<PixelGeometry>,
}

impl SinkConfig {
    /// Configuration encoding for terminals only
    #[must_use]
    pub fn terminal_only(geometry: TerminalGeometry) -> Self {
        Self {
            terminal: Some(geometry),
            ..Self::default()
        }
    }

    /// True when no sink is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display.is_none() && self.terminal.is_none() && self.pixel.is_none()
    }
}

/// One frame encoded for every configured sink
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Handle of the image stored in the pixel client
    pub pixel: Option<PixelRef>,
    /// Bit-packed panel rows
    pub display: Option<Vec<u8>>,
    /// Full-screen ANSI redraw
    pub terminal: Option<String>,
}

/// Errors raised by the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Lookup for a key that was never precomputed
    #[error("No encoded frame for {image_ref:?} under {config:?}; precompute was not run")]
    CacheMiss {
        /// Requested coordinates
        image_ref: ImageRef,
        /// Requested configuration
        config: SinkConfig,
    },

    /// A pixel geometry was configured but no client was supplied
    #[error("Pixel output configured without a pixel client")]
    MissingPixelClient,

    /// Storing an image in the pixel client failed
    #[error("Pixel client rejected image: {0}")]
    Pixel(#[from] PixelError),
}

/// Result of a [`FrameCache::precompute`] pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrecomputeStats {
    /// Distinct frame images of the agent
    pub images: usize,
    /// Entries encoded by this pass
    pub encoded: usize,
}

/// Per-agent memo of encoded frames
pub struct FrameCache {
    agent: Arc<AgentDefinition>,
    entries: HashMap<(ImageRef, SinkConfig), Arc<EncodedFrame>>,
    gamma: GammaTable,
    encode_count: usize,
}

impl FrameCache {
    /// Empty cache for `agent`
    #[must_use]
    pub fn new(agent: Arc<AgentDefinition>) -> Self {
        Self {
            agent,
            entries: HashMap::new(),
            gamma: GammaTable::new(DISPLAY_GAMMA),
            encode_count: 0,
        }
    }

    /// The agent whose frames are cached
    #[must_use]
    pub fn agent(&self) -> &Arc<AgentDefinition> {
        &self.agent
    }

    /// Encode every frame image of the agent for `config`
    ///
    /// Already cached entries are skipped, so repeating a call performs no
    /// work. Progress is logged as frames are encoded.
    ///
    /// # Errors
    ///
    /// Fails with `MissingPixelClient` when `config.pixel` is set without a
    /// client, or with `Pixel` when the client refuses an image.
    pub fn precompute(
        &mut self,
        config: &SinkConfig,
        mut pixel: Option<&mut dyn PixelClient>,
    ) -> Result<PrecomputeStats, CacheError> {
        if config.pixel.is_some() && pixel.is_none() {
            return Err(CacheError::MissingPixelClient);
        }

        let images: BTreeSet<ImageRef> = self
            .agent
            .animations()
            .flat_map(|(_, frames)| frames.iter().filter_map(|f| f.image_ref))
            .collect();
        let pending: Vec<ImageRef> = images
            .iter()
            .copied()
            .filter(|image_ref| !self.entries.contains_key(&(*image_ref, *config)))
            .collect();

        let total = pending.len();
        for (done, image_ref) in pending.into_iter().enumerate() {
            let encoded = self.encode(image_ref, config, pixel.as_deref_mut())?;
            self.entries.insert((image_ref, *config), Arc::new(encoded));
            self.encode_count += 1;
            tracing::debug!(
                agent = self.agent.name(),
                encoded = done + 1,
                total,
                "Encoding frames"
            );
        }

        if total > 0 {
            tracing::info!(
                agent = self.agent.name(),
                images = images.len(),
                encoded = total,
                "Frame cache ready"
            );
        }

        Ok(PrecomputeStats {
            images: images.len(),
            encoded: total,
        })
    }

    fn encode<'p>(
        &self,
        image_ref: ImageRef,
        config: &SinkConfig,
        pixel: Option<&mut (dyn PixelClient + 'p)>,
    ) -> Result<EncodedFrame, CacheError> {
        let frame = render::crop(self.agent.atlas(), image_ref, self.agent.frame_size());

        let display = config
            .display
            .map(|geometry| render::display_bits(&frame, geometry, &self.gamma));
        let terminal = config
            .terminal
            .map(|geometry| render::terminal_text(&frame, geometry));
        let pixel = match (config.pixel, pixel) {
            (Some(geometry), Some(client)) => {
                let rgba = render::pixel_rgba(&frame, geometry);
                Some(client.store_image(rgba.as_raw(), geometry.width, geometry.height)?)
            }
            _ => None,
        };

        Ok(EncodedFrame {
            pixel,
            display,
            terminal,
        })
    }

    /// Fetch a precomputed frame
    ///
    /// # Errors
    ///
    /// Returns `CacheMiss` if `precompute` never ran for this key.
    pub fn lookup(
        &self,
        image_ref: ImageRef,
        config: &SinkConfig,
    ) -> Result<Arc<EncodedFrame>, CacheError> {
        self.entries
            .get(&(image_ref, *config))
            .cloned()
            .ok_or(CacheError::CacheMiss {
                image_ref,
                config: *config,
            })
    }

    /// Total entries encoded over the cache's lifetime
    #[must_use]
    pub fn encode_count(&self) -> usize {
        self.encode_count
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("agent", &self.agent.name())
            .field("entries", &self.entries.len())
            .field("encode_count", &self.encode_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use image::{Rgba, RgbaImage};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::agent::{Frame, FrameSize};
    use crate::sinks::pixel::PixelflutClient;

    fn agent() -> Arc<AgentDefinition> {
        let mut atlas = RgbaImage::from_pixel(4, 2, Rgba([255, 255, 255, 255]));
        atlas.put_pixel(3, 1, Rgba([255, 0, 0, 255]));
        let a = ImageRef { x: 0, y: 0 };
        let b = ImageRef { x: 2, y: 0 };
        let mut animations = HashMap::new();
        animations.insert(
            "Greeting".to_string(),
            vec![
                Frame::linear(100, Some(a)),
                Frame::linear(50, None),
                Frame::linear(100, Some(b)),
                Frame::linear(100, Some(a)),
            ],
        );
        animations.insert("Idle".to_string(), vec![Frame::linear(100, Some(b))]);
        Arc::new(
            AgentDefinition::new(
                "Clippy",
                FrameSize {
                    width: 2,
                    height: 2,
                },
                atlas,
                animations,
            )
            .unwrap(),
        )
    }

    fn config() -> SinkConfig {
        SinkConfig {
            display: Some(DisplayGeometry {
                width: 16,
                height: 24,
            }),
            terminal: Some(TerminalGeometry { cols: 4, rows: 2 }),
            pixel: None,
        }
    }

    #[test]
    fn test_precompute_is_idempotent() {
        let mut cache = FrameCache::new(agent());
        let stats = cache.precompute(&config(), None).unwrap();
        assert_eq!(
            stats,
            PrecomputeStats {
                images: 2,
                encoded: 2
            }
        );
        assert_eq!(cache.encode_count(), 2);

        let again = cache.precompute(&config(), None).unwrap();
        assert_eq!(again.encoded, 0);
        assert_eq!(cache.encode_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lookup_returns_same_payload() {
        let mut cache = FrameCache::new(agent());
        cache.precompute(&config(), None).unwrap();

        let at = ImageRef { x: 2, y: 0 };
        let first = cache.lookup(at, &config()).unwrap();
        let second = cache.lookup(at, &config()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let display = first.display.as_ref().unwrap();
        // 24 rows keep 16 panel rows of 16 pixels
        assert_eq!(display.len(), 16 * 16 / 8);
        assert!(first.terminal.as_ref().unwrap().starts_with(render::CURSOR_HOME));
        assert_eq!(first.pixel, None);
    }

    #[test]
    fn test_cache_miss_before_precompute() {
        let mut cache = FrameCache::new(agent());
        let at = ImageRef { x: 0, y: 0 };
        assert!(matches!(
            cache.lookup(at, &config()),
            Err(CacheError::CacheMiss { .. })
        ));

        cache.precompute(&config(), None).unwrap();
        let other = SinkConfig::terminal_only(TerminalGeometry { cols: 8, rows: 4 });
        assert!(matches!(
            cache.lookup(at, &other),
            Err(CacheError::CacheMiss { .. })
        ));
    }

    #[test]
    fn test_new_configuration_encodes_again() {
        let mut cache = FrameCache::new(agent());
        cache.precompute(&config(), None).unwrap();
        let other = SinkConfig::terminal_only(TerminalGeometry { cols: 8, rows: 4 });
        cache.precompute(&other, None).unwrap();
        assert_eq!(cache.encode_count(), 4);

        let frame = cache.lookup(ImageRef { x: 0, y: 0 }, &other).unwrap();
        assert!(frame.display.is_none());
        assert!(frame.terminal.is_some());
    }

    #[test]
    fn test_pixel_images_stored_once() {
        let mut cache = FrameCache::new(agent());
        let mut client = PixelflutClient::new();
        let config = SinkConfig {
            pixel: Some(PixelGeometry {
                x: 0,
                y: 0,
                width: 3,
                height: 3,
            }),
            ..SinkConfig::default()
        };

        assert!(matches!(
            cache.precompute(&config, None),
            Err(CacheError::MissingPixelClient)
        ));

        cache.precompute(&config, Some(&mut client)).unwrap();
        cache.precompute(&config, Some(&mut client)).unwrap();
        assert_eq!(client.stored(), 2);

        let refs: BTreeSet<usize> = [ImageRef { x: 0, y: 0 }, ImageRef { x: 2, y: 0 }]
            .into_iter()
            .map(|at| cache.lookup(at, &config).unwrap().pixel.unwrap().0)
            .collect();
        assert_eq!(refs, BTreeSet::from([0, 1]));
    }
}

//! Agent Definitions
//!
//! An agent is a character made of two files in its own directory:
//!
//! - `agent.json`: frame size and the animation graph
//! - `map.png`: the atlas every frame image is cropped from
//!
//! The parsed [`AgentDefinition`] is immutable once built. Engines, caches
//! and sessions share it through an `Arc` and never mutate it.
//!
//! # Transitions
//!
//! Every frame carries exactly one [`Transition`]. The document format allows
//! a frame to list both an exit branch and weighted branches; the exit
//! branch wins.

mod document;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use thiserror::Error;

use document::AgentDocument;

/// File name of the animation document inside an agent directory
pub const AGENT_DOCUMENT: &str = "agent.json";

/// File name of the atlas image inside an agent directory
pub const AGENT_ATLAS: &str = "map.png";

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while loading an agent bundle
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent directory does not exist
    #[error("Agent not found at {0}")]
    NotFound(PathBuf),

    /// A bundle file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The animation document is malformed
    #[error("Malformed agent document {path}: {source}")]
    Parse {
        /// Document path
        path: PathBuf,
        /// JSON error
        source: serde_json::Error,
    },

    /// The atlas image could not be decoded
    #[error("Failed to decode atlas {path}: {source}")]
    Image {
        /// Atlas path
        path: PathBuf,
        /// Decoder error
        source: image::ImageError,
    },

    /// A frame references a crop window outside the atlas
    #[error("Frame {index} of animation {animation:?} crops outside the atlas at ({x}, {y})")]
    FrameOutOfAtlas {
        /// Animation name
        animation: String,
        /// Frame index within the animation
        index: usize,
        /// Crop x
        x: u32,
        /// Crop y
        y: u32,
    },
}

// =============================================================================
// Frame Graph
// =============================================================================

/// Atlas coordinates of a frame's top-left corner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageRef {
    /// Horizontal offset in atlas pixels
    pub x: u32,
    /// Vertical offset in atlas pixels
    pub y: u32,
}

/// Size of one crop window into the atlas
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameSize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// One weighted branch of a [`Transition::WeightedBranch`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeightedBranch {
    /// Probability of this branch in percent
    pub weight_percent: u32,
    /// Frame index to jump to
    pub target: usize,
}

/// Rule picking the frame that follows the current one
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Transition {
    /// Continue with the next frame
    #[default]
    Linear,
    /// Jump to a fixed frame
    ExitBranch {
        /// Frame index to jump to
        target: usize,
    },
    /// Jump by weighted random draw, falling through to the next frame when
    /// no branch covers the draw
    WeightedBranch {
        /// Candidate branches in document order
        branches: Vec<WeightedBranch>,
    },
}

/// One step of an animation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// How long the frame stays on screen
    pub duration_ms: u64,
    /// Crop origin in the atlas; `None` for timing-only frames
    pub image_ref: Option<ImageRef>,
    /// Successor rule
    pub transition: Transition,
}

impl Frame {
    /// A linear frame showing the given atlas position
    #[must_use]
    pub fn linear(duration_ms: u64, image_ref: Option<ImageRef>) -> Self {
        Self {
            duration_ms,
            image_ref,
            transition: Transition::Linear,
        }
    }
}

// =============================================================================
// Agent Definition
// =============================================================================

/// Parsed, immutable agent bundle
#[derive(Debug)]
pub struct AgentDefinition {
    name: String,
    frame_size: FrameSize,
    atlas: RgbaImage,
    animations: HashMap<String, Vec<Frame>>,
}

impl AgentDefinition {
    /// Assemble a definition from already parsed parts
    ///
    /// # Errors
    ///
    /// Returns `AgentError::FrameOutOfAtlas` when a frame's crop window does
    /// not fit inside `atlas`.
    pub fn new(
        name: impl Into<String>,
        frame_size: FrameSize,
        atlas: RgbaImage,
        animations: HashMap<String, Vec<Frame>>,
    ) -> Result<Self, AgentError> {
        let definition = Self {
            name: name.into(),
            frame_size,
            atlas,
            animations,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Load `<dir>/agent.json` and `<dir>/map.png`
    ///
    /// The agent is named after the directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory is missing, a file cannot be read, the
    /// document is malformed, or a frame crops outside the atlas.
    pub fn load(dir: &Path) -> Result<Self, AgentError> {
        if !dir.is_dir() {
            return Err(AgentError::NotFound(dir.to_path_buf()));
        }

        let document_path = dir.join(AGENT_DOCUMENT);
        let text = std::fs::read_to_string(&document_path).map_err(|source| AgentError::Io {
            path: document_path.clone(),
            source,
        })?;
        let document: AgentDocument =
            serde_json::from_str(&text).map_err(|source| AgentError::Parse {
                path: document_path,
                source,
            })?;

        let atlas_path = dir.join(AGENT_ATLAS);
        let atlas = image::open(&atlas_path)
            .map_err(|source| match source {
                image::ImageError::IoError(io) => AgentError::Io {
                    path: atlas_path.clone(),
                    source: io,
                },
                other => AgentError::Image {
                    path: atlas_path.clone(),
                    source: other,
                },
            })?
            .to_rgba8();

        let name = dir
            .file_name()
            .map_or_else(|| dir.display().to_string(), |n| n.to_string_lossy().into_owned());

        let [width, height] = document.frame_size;
        let animations = document
            .animations
            .into_iter()
            .map(|(name, animation)| {
                let frames = animation
                    .frames
                    .into_iter()
                    .map(document::FrameDocument::into_frame)
                    .collect();
                (name, frames)
            })
            .collect();

        let definition = Self::new(name, FrameSize { width, height }, atlas, animations)?;

        tracing::info!(
            agent = %definition.name,
            animations = definition.animations.len(),
            frame_width = width,
            frame_height = height,
            "Loaded agent"
        );
        Ok(definition)
    }

    fn validate(&self) -> Result<(), AgentError> {
        let (atlas_w, atlas_h) = self.atlas.dimensions();
        for (animation, frames) in &self.animations {
            for (index, frame) in frames.iter().enumerate() {
                let Some(ImageRef { x, y }) = frame.image_ref else {
                    continue;
                };
                let fits_x = x.checked_add(self.frame_size.width).is_some_and(|r| r <= atlas_w);
                let fits_y = y.checked_add(self.frame_size.height).is_some_and(|b| b <= atlas_h);
                if !(fits_x && fits_y) {
                    return Err(AgentError::FrameOutOfAtlas {
                        animation: animation.clone(),
                        index,
                        x,
                        y,
                    });
                }
            }
        }
        Ok(())
    }

    /// Agent name (its directory name when loaded from disk)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of one frame image
    #[must_use]
    pub fn frame_size(&self) -> FrameSize {
        self.frame_size
    }

    /// The shared atlas image
    #[must_use]
    pub fn atlas(&self) -> &RgbaImage {
        &self.atlas
    }

    /// Frames of one animation
    #[must_use]
    pub fn animation(&self, name: &str) -> Option<&[Frame]> {
        self.animations.get(name).map(Vec::as_slice)
    }

    /// Animation names in sorted order
    #[must_use]
    pub fn animation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.animations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Iterate over every animation and its frames
    pub fn animations(&self) -> impl Iterator<Item = (&str, &[Frame])> {
        self.animations
            .iter()
            .map(|(name, frames)| (name.as_str(), frames.as_slice()))
    }
}

/// Resolve an agent directory below `agents_dir`
#[must_use]
pub fn agent_path(agents_dir: &Path, name: &str) -> PathBuf {
    agents_dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LEGACY_DOCUMENT: &str = r#"{
        "overlayCount": 1,
        "framesize": [4, 3],
        "sounds": ["1", "2"],
        "animations": {
            "Wave": {
                "frames": [
                    {"duration": 100, "images": [[0, 0], [4, 0]]},
                    {"duration": 80, "images": [[4, 0]], "exitBranch": 3,
                     "branching": {"branches": [{"frameIndex": 0, "weight": 50}]}},
                    {"duration": 60, "sound": "2"},
                    {"duration": 40, "images": [[0, 3]],
                     "branching": {"branches": [{"frameIndex": 1, "weight": 40}]}}
                ]
            }
        }
    }"#;

    fn write_bundle(dir: &Path, document: &str, atlas: (u32, u32)) {
        std::fs::write(dir.join(AGENT_DOCUMENT), document).unwrap();
        RgbaImage::new(atlas.0, atlas.1)
            .save(dir.join(AGENT_ATLAS))
            .unwrap();
    }

    #[test]
    fn test_legacy_document_converts() {
        let document: AgentDocument = serde_json::from_str(LEGACY_DOCUMENT).unwrap();
        assert_eq!(document.frame_size, [4, 3]);

        let mut frames: Vec<Frame> = document
            .animations
            .into_iter()
            .next()
            .unwrap()
            .1
            .frames
            .into_iter()
            .map(document::FrameDocument::into_frame)
            .collect();

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].image_ref, Some(ImageRef { x: 0, y: 0 }));
        assert_eq!(frames[0].transition, Transition::Linear);
        // Exit branch wins over branching
        assert_eq!(frames[1].transition, Transition::ExitBranch { target: 3 });
        assert_eq!(frames[2].image_ref, None);
        assert_eq!(
            frames.pop().unwrap().transition,
            Transition::WeightedBranch {
                branches: vec![WeightedBranch {
                    weight_percent: 40,
                    target: 1
                }]
            }
        );
    }

    #[test]
    fn test_camel_case_document_converts() {
        let json = r#"{
            "frameSize": [2, 2],
            "animations": {"Idle": {"frames": [
                {"durationMs": 10, "imageRef": [2, 0],
                 "branching": {"branches": [{"weightPercent": 30, "frameIndex": 0}]}}
            ]}}
        }"#;
        let document: AgentDocument = serde_json::from_str(json).unwrap();
        let frame = document
            .animations
            .into_values()
            .next()
            .unwrap()
            .frames
            .into_iter()
            .next()
            .unwrap()
            .into_frame();
        assert_eq!(frame.duration_ms, 10);
        assert_eq!(frame.image_ref, Some(ImageRef { x: 2, y: 0 }));
        assert!(matches!(frame.transition, Transition::WeightedBranch { .. }));
    }

    #[test]
    fn test_load_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let agent_dir = dir.path().join("Clippy");
        std::fs::create_dir(&agent_dir).unwrap();
        write_bundle(&agent_dir, LEGACY_DOCUMENT, (8, 6));

        let agent = AgentDefinition::load(&agent_dir).unwrap();
        assert_eq!(agent.name(), "Clippy");
        assert_eq!(agent.frame_size(), FrameSize { width: 4, height: 3 });
        assert_eq!(agent.animation_names(), vec!["Wave"]);
        assert_eq!(agent.animation("Wave").map(<[Frame]>::len), Some(4));
        assert!(agent.animation("Nope").is_none());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = AgentDefinition::load(&dir.path().join("Ghost")).unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[test]
    fn test_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "{\"animations\": 5}", (8, 6));
        let err = AgentDefinition::load(dir.path()).unwrap_err();
        assert!(matches!(err, AgentError::Parse { .. }));
    }

    #[test]
    fn test_frame_outside_atlas_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // Atlas too small for the frame at (0, 3)
        write_bundle(dir.path(), LEGACY_DOCUMENT, (8, 5));
        let err = AgentDefinition::load(dir.path()).unwrap_err();
        assert!(matches!(err, AgentError::FrameOutOfAtlas { index: 3, .. }));
    }
}

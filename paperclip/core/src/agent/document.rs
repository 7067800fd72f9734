//! On-disk agent document (`agent.json`)
//!
//! Mirrors the JSON layout of an agent bundle. Both the camel-case keys
//! (`frameSize`, `durationMs`, `imageRef`, `weightPercent`) and the legacy
//! keys found in existing bundles (`framesize`, `duration`, `images`,
//! `weight`) are accepted. Keys we do not play (sounds, overlay counts) are
//! ignored.

use std::collections::HashMap;

use serde::Deserialize;

use super::{Frame, ImageRef, Transition, WeightedBranch};

/// Top-level agent document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AgentDocument {
    #[serde(alias = "framesize")]
    pub frame_size: [u32; 2],
    pub animations: HashMap<String, AnimationDocument>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnimationDocument {
    #[serde(default)]
    pub frames: Vec<FrameDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FrameDocument {
    #[serde(default, alias = "duration")]
    pub duration_ms: u64,
    #[serde(default)]
    pub image_ref: Option<[u32; 2]>,
    /// Legacy multi-layer form; only the first layer is drawn
    #[serde(default)]
    pub images: Option<Vec<[u32; 2]>>,
    #[serde(default)]
    pub branching: Option<BranchingDocument>,
    #[serde(default)]
    pub exit_branch: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchingDocument {
    #[serde(default)]
    pub branches: Vec<BranchDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BranchDocument {
    #[serde(alias = "weight")]
    pub weight_percent: u32,
    pub frame_index: usize,
}

impl FrameDocument {
    /// Convert into the runtime frame.
    ///
    /// An exit branch wins over weighted branching when both are present.
    pub(crate) fn into_frame(self) -> Frame {
        let image_ref = self
            .image_ref
            .or_else(|| self.images.and_then(|layers| layers.first().copied()))
            .map(|[x, y]| ImageRef { x, y });

        let transition = match (self.exit_branch, self.branching) {
            (Some(target), _) => Transition::ExitBranch { target },
            (None, Some(branching)) => Transition::WeightedBranch {
                branches: branching
                    .branches
                    .into_iter()
                    .map(|b| WeightedBranch {
                        weight_percent: b.weight_percent,
                        target: b.frame_index,
                    })
                    .collect(),
            },
            (None, None) => Transition::Linear,
        };

        Frame {
            duration_ms: self.duration_ms,
            image_ref,
            transition,
        }
    }
}

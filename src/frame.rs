//! Frame metadata tracked end to end through the pipeline.
//!
//! - `Frame`: per-frame metadata owned by the frame registry for the frame's lifetime.
//! - `FrameContent`: encoded/raw bytes or a marker for content held elsewhere.
//! - `Transformation`: append-only record of geometry operations applied to the frame.
//! - `FrameLinkage`: presentation-order predecessor, set upstream.
//!
//! Object annotations live in [`object`].

pub mod object;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::geometry::Resolution;
use object::{ObjectMeta, VideoObject};

/// Process-unique frame identifier assigned by the frame registry.
pub type FrameId = u64;

// ----------------------------------------------------------------------------
// Content
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameContent {
    #[default]
    None,
    /// Bytes carried with the frame metadata.
    Internal { data: Vec<u8> },
    /// Content lives in an external buffer that has not been materialized.
    External {
        method: String,
        location: Option<String>,
    },
}

impl FrameContent {
    pub fn is_internal(&self) -> bool {
        matches!(self, FrameContent::Internal { .. })
    }

    /// Take internal bytes out, leaving `None` behind. Other content is kept.
    pub fn take_internal(&mut self) -> Option<Vec<u8>> {
        if !self.is_internal() {
            return None;
        }
        match std::mem::take(self) {
            FrameContent::Internal { data } => Some(data),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodingMethod {
    /// Original content relayed unchanged.
    #[default]
    Copy,
    /// Content produced by the pipeline's encoder.
    Encoded,
}

// ----------------------------------------------------------------------------
// Transformations
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transformation {
    InitialSize {
        width: u32,
        height: u32,
    },
    Scale {
        width: u32,
        height: u32,
    },
    Padding {
        left: u32,
        top: u32,
        right: u32,
        bottom: u32,
    },
    ResultingSize {
        width: u32,
        height: u32,
    },
}

impl Transformation {
    /// Frame size after this transformation, for size-defining operations.
    pub fn size(&self) -> Option<(u32, u32)> {
        match *self {
            Transformation::InitialSize { width, height }
            | Transformation::Scale { width, height }
            | Transformation::ResultingSize { width, height } => Some((width, height)),
            Transformation::Padding { .. } => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Linkage
// ----------------------------------------------------------------------------

/// Presentation-order link to the preceding frame of the same source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "previous", rename_all = "snake_case")]
pub enum FrameLinkage {
    /// No linkage metadata was attached upstream.
    #[default]
    Unavailable,
    /// The frame has no predecessor it can be ordered against.
    Unlinked,
    /// The frame follows the given frame in presentation order.
    After(FrameId),
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Assigned by the registry on `create`; zero until then.
    pub id: FrameId,
    pub source_id: String,
    pub pts: i64,
    pub dts: Option<i64>,
    /// Native frame size.
    pub width: u32,
    pub height: u32,
    pub codec: Option<String>,
    pub keyframe: bool,
    pub content: FrameContent,
    pub transcoding_method: TranscodingMethod,
    pub transformations: Vec<Transformation>,
    /// Externally supplied objects, in source-native coordinates.
    pub objects: Vec<VideoObject>,
    /// Objects in processing coordinates, built by the ingress stage.
    pub processing_objects: Vec<ObjectMeta>,
    pub linkage: FrameLinkage,
}

impl Frame {
    pub fn new(source_id: &str, pts: i64, width: u32, height: u32) -> Self {
        Self {
            id: 0,
            source_id: source_id.to_string(),
            pts,
            dts: None,
            width,
            height,
            codec: None,
            keyframe: false,
            content: FrameContent::None,
            transcoding_method: TranscodingMethod::Copy,
            transformations: vec![Transformation::InitialSize { width, height }],
            objects: Vec::new(),
            processing_objects: Vec::new(),
            linkage: FrameLinkage::Unavailable,
        }
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn with_codec(mut self, codec: &str) -> Self {
        self.codec = Some(codec.to_string());
        self
    }

    pub fn with_content(mut self, content: FrameContent) -> Self {
        self.content = content;
        self
    }

    pub fn with_linkage(mut self, linkage: FrameLinkage) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn with_object(mut self, object: VideoObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Presentation-order predecessor, if any.
    ///
    /// Fails with `LinkageUnavailable` when no linkage metadata was attached.
    pub fn previous_frame_id(&self) -> Result<Option<FrameId>> {
        match self.linkage {
            FrameLinkage::Unavailable => Err(PipelineError::LinkageUnavailable { frame_id: self.id }),
            FrameLinkage::Unlinked => Ok(None),
            FrameLinkage::After(previous) => Ok(Some(previous)),
        }
    }

    /// Frame size after the last size-defining transformation.
    ///
    /// A trailing padding transformation yields `(0, 0)` so that a scale is
    /// appended again.
    pub fn last_transformation_size(&self) -> Option<(u32, u32)> {
        self.transformations
            .last()
            .map(|last| last.size().unwrap_or((0, 0)))
    }

    pub fn add_transformation(&mut self, transformation: Transformation) {
        self.transformations.push(transformation);
    }

    pub fn primary_object(&self) -> Option<&ObjectMeta> {
        self.processing_objects.iter().find(|obj| obj.is_primary())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

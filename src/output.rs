//! Output side data model: how frames leave the pipeline and what the sink
//! receives.

use serde::{Serialize, Serializer};

use crate::codec::{Codec, PASS_THROUGH_CODEC};
use crate::error::Result;
use crate::frame::{Frame, FrameId};
use crate::registry::SpanContext;

// ----------------------------------------------------------------------------
// Mode
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Frames leave with metadata only.
    MetadataOnly,
    /// Uncompressed frames from the processing batch.
    Raw { codec: Codec },
    /// Frames re-encoded by the pipeline's encoder, one per buffer.
    Encoded { codec: Codec },
    /// Original encoded content relayed unchanged.
    PassThrough,
}

impl OutputMode {
    /// Map the configured output codec. `None` means metadata only and
    /// `"copy"` selects pass-through.
    pub fn from_codec_name(name: Option<&str>) -> Result<Self> {
        let Some(name) = name else {
            return Ok(OutputMode::MetadataOnly);
        };
        if name.trim().eq_ignore_ascii_case(PASS_THROUGH_CODEC) {
            return Ok(OutputMode::PassThrough);
        }
        let codec: Codec = name.parse()?;
        if codec.is_raw() {
            Ok(OutputMode::Raw { codec })
        } else {
            Ok(OutputMode::Encoded { codec })
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, OutputMode::PassThrough)
    }

    /// Only relayed streams can arrive out of presentation order.
    pub fn reorders(&self) -> bool {
        self.is_pass_through()
    }

    pub fn codec(&self) -> Option<Codec> {
        match self {
            OutputMode::Raw { codec } | OutputMode::Encoded { codec } => Some(*codec),
            OutputMode::MetadataOnly | OutputMode::PassThrough => None,
        }
    }

    /// Whether raw batch buffers carry frame bytes to the sink.
    pub fn emits_raw_content(&self) -> bool {
        matches!(self, OutputMode::Raw { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputMode::MetadataOnly => "metadata-only",
            OutputMode::Raw { .. } => "raw",
            OutputMode::Encoded { .. } => "encoded",
            OutputMode::PassThrough => "pass-through",
        }
    }
}

// ----------------------------------------------------------------------------
// Buffers produced by the processing stage
// ----------------------------------------------------------------------------

/// One encoded frame out of the encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedBuffer {
    /// Frame tag attached upstream; `None` when the tag was lost.
    pub frame_idx: Option<FrameId>,
    pub pts: i64,
    pub dts: Option<i64>,
    pub data: Vec<u8>,
    pub delta_unit: bool,
}

/// One frame of a processed raw batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBatchEntry {
    pub frame_idx: Option<FrameId>,
    pub pts: i64,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputBuffer {
    Encoded(EncodedBuffer),
    RawBatch(Vec<RawBatchEntry>),
}

impl OutputBuffer {
    pub fn pts(&self) -> Option<i64> {
        match self {
            OutputBuffer::Encoded(buffer) => Some(buffer.pts),
            OutputBuffer::RawBatch(entries) => entries.first().map(|entry| entry.pts),
        }
    }

    /// Split the buffer into per-frame outputs.
    pub fn into_output_frames(self, mode: &OutputMode) -> Vec<OutputFrame> {
        let codec = mode.codec();
        match self {
            OutputBuffer::Encoded(buffer) => {
                let (content, dts) = if buffer.data.is_empty() {
                    (None, None)
                } else {
                    (Some(buffer.data), buffer.dts)
                };
                vec![OutputFrame {
                    idx: buffer.frame_idx,
                    pts: buffer.pts,
                    dts,
                    content,
                    codec,
                    keyframe: !buffer.delta_unit,
                }]
            }
            // Raw frames are never inter-coded: every one is a keyframe.
            OutputBuffer::RawBatch(entries) => entries
                .into_iter()
                .map(|entry| OutputFrame {
                    idx: entry.frame_idx,
                    pts: entry.pts,
                    dts: None,
                    content: (mode.emits_raw_content() && !entry.data.is_empty())
                        .then_some(entry.data),
                    codec,
                    keyframe: true,
                })
                .collect(),
        }
    }
}

/// Per-frame output extracted from a buffer, before it is matched with the
/// frame's metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFrame {
    pub idx: Option<FrameId>,
    pub pts: i64,
    pub dts: Option<i64>,
    pub content: Option<Vec<u8>>,
    pub codec: Option<Codec>,
    pub keyframe: bool,
}

// ----------------------------------------------------------------------------
// Sink messages
// ----------------------------------------------------------------------------

/// Finalized frame handed to the sink. The frame is no longer registered.
#[derive(Clone, Debug, Serialize)]
pub struct SinkVideoFrame {
    pub frame: Frame,
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<Vec<u8>>,
    pub span_context: SpanContext,
}

fn serialize_content<S: Serializer>(
    content: &Option<Vec<u8>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match content {
        Some(data) => serializer.serialize_some(&hex::encode(data)),
        None => serializer.serialize_none(),
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkMessage {
    VideoFrame(SinkVideoFrame),
    Batch { frames: Vec<SinkVideoFrame> },
    EndOfStream { source_id: String },
}

impl SinkMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkMessage::VideoFrame(_) => "video_frame",
            SinkMessage::Batch { .. } => "batch",
            SinkMessage::EndOfStream { .. } => "end_of_stream",
        }
    }

    /// Number of frames carried by the message.
    pub fn frame_count(&self) -> usize {
        match self {
            SinkMessage::VideoFrame(_) => 1,
            SinkMessage::Batch { frames } => frames.len(),
            SinkMessage::EndOfStream { .. } => 0,
        }
    }
}

//! Synthetic `stub://` source producing B-frame GOPs in decode order.
//!
//! Stands in for the decoder and encoder around the pipeline: frames are
//! registered in decode order, linked to their presentation-order
//! predecessor, run through the input hook and handed back as output buffers
//! in the same decode order.

use anyhow::{anyhow, Result};

use crate::frame::object::VideoObject;
use crate::frame::{Frame, FrameContent, FrameId};
use crate::geometry::{BBox, ObjectBox};
use crate::output::{EncodedBuffer, OutputBuffer, OutputMode, RawBatchEntry};
use crate::pipeline::Pipeline;
use crate::processor::InputBatch;

pub const STUB_SCHEME: &str = "stub://";

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames per GOP, keyframe included.
    pub gop_size: u32,
    /// B-frames between consecutive anchor frames.
    pub b_frames: u32,
    pub codec: String,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://cam-1".to_string(),
            width: 1280,
            height: 720,
            fps: 25,
            gop_size: 12,
            b_frames: 2,
            codec: "h264".to_string(),
        }
    }
}

/// One frame of a GOP, in decode order.
#[derive(Clone, Debug)]
pub struct SyntheticFrame {
    pub frame: Frame,
    /// Decode-order index (within the GOP) of the presentation predecessor.
    pub follows: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct SyntheticStats {
    pub source_id: String,
    pub frames_generated: u64,
    pub gops: u64,
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    source_id: String,
    frame_count: u64,
    gop_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        let source_id = config
            .url
            .strip_prefix(STUB_SCHEME)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("only {}<source-id> urls are supported: {}", STUB_SCHEME, config.url))?
            .to_string();
        if config.gop_size == 0 || config.fps == 0 {
            return Err(anyhow!("gop_size and fps must be greater than zero"));
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        log::info!(
            "SyntheticSource: {} at {}x{} ({} fps, gop {}, {} b-frames)",
            source_id,
            config.width,
            config.height,
            config.fps,
            config.gop_size,
            config.b_frames
        );
        Ok(Self {
            config,
            source_id,
            frame_count: 0,
            gop_count: 0,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn stats(&self) -> SyntheticStats {
        SyntheticStats {
            source_id: self.source_id.clone(),
            frames_generated: self.frame_count,
            gops: self.gop_count,
        }
    }

    /// Produce the next GOP in decode order.
    pub fn next_gop(&mut self) -> Vec<SyntheticFrame> {
        let order = decode_order(self.config.gop_size, self.config.b_frames);
        let base = self.frame_count;
        let frame_duration = 1_000_000_000 / i64::from(self.config.fps);

        // presentation index -> decode index
        let mut decode_index = vec![0usize; order.len()];
        for (decoded, presented) in order.iter().enumerate() {
            decode_index[*presented] = decoded;
        }

        let gop = order
            .iter()
            .enumerate()
            .map(|(decoded, &presented)| {
                let number = base + presented as u64;
                let pts = number as i64 * frame_duration;
                let dts = (base + decoded as u64) as i64 * frame_duration;
                let frame = Frame::new(&self.source_id, pts, self.config.width, self.config.height)
                    .with_dts(dts)
                    .with_keyframe(presented == 0)
                    .with_codec(&self.config.codec)
                    .with_content(FrameContent::Internal {
                        data: self.payload(number),
                    })
                    .with_object(self.moving_object(number));
                SyntheticFrame {
                    frame,
                    follows: presented.checked_sub(1).map(|previous| decode_index[previous]),
                }
            })
            .collect();

        self.frame_count += order.len() as u64;
        self.gop_count += 1;
        gop
    }

    /// Push one GOP through the pipeline. Returns the number of frames sent
    /// to the sink.
    pub fn pump_gop(&mut self, pipeline: &mut Pipeline) -> Result<usize> {
        let gop = self.next_gop();
        let mut ids: Vec<FrameId> = Vec::with_capacity(gop.len());
        let mut follows = Vec::with_capacity(gop.len());
        let mut pts = Vec::with_capacity(gop.len());
        let mut payloads = Vec::with_capacity(gop.len());
        for synthetic in gop {
            follows.push(synthetic.follows);
            pts.push(synthetic.frame.pts);
            payloads.push((synthetic.frame.dts, synthetic.frame.keyframe));
            ids.push(pipeline.create_frame(synthetic.frame)?);
        }
        for (id, follows) in ids.iter().zip(follows.iter().copied()) {
            pipeline.set_previous_frame_id(*id, follows.map(|index| ids[index]))?;
        }

        let batch_id = pipeline.create_batch(&ids)?;
        pipeline.prepare_input(&InputBatch::tagged(batch_id, &pts))?;

        let mode = pipeline.mode();
        let mut sent = 0;
        for (index, id) in ids.iter().enumerate() {
            let (dts, keyframe) = payloads[index];
            let buffer = match mode {
                OutputMode::Encoded { .. } => OutputBuffer::Encoded(EncodedBuffer {
                    frame_idx: Some(*id),
                    pts: pts[index],
                    dts,
                    data: self.payload(*id),
                    delta_unit: !keyframe,
                }),
                _ => OutputBuffer::RawBatch(vec![RawBatchEntry {
                    frame_idx: Some(*id),
                    pts: pts[index],
                    data: self.raw_pixels(*id),
                }]),
            };
            sent += pipeline.prepare_output(&self.source_id, buffer)?;
        }
        Ok(sent)
    }

    fn payload(&self, number: u64) -> Vec<u8> {
        (0..16u64).map(|i| ((number + i) % 256) as u8).collect()
    }

    /// Small RGBA tile; the full frame is never materialized.
    fn raw_pixels(&self, number: u64) -> Vec<u8> {
        (0..64u64).map(|i| ((i * 3 + number) % 256) as u8).collect()
    }

    fn moving_object(&self, number: u64) -> VideoObject {
        let width = self.config.width as f32;
        let height = self.config.height as f32;
        let travel = (number % 100) as f32 / 100.0;
        let bbox = BBox::new(width * (0.1 + 0.8 * travel), height * 0.5, width * 0.1, height * 0.2);
        VideoObject::new(1, "synthetic", "motion", ObjectBox::Regular(bbox))
            .with_confidence(0.9)
            .with_track_id(1)
    }
}

/// Presentation indices of one GOP in decode order.
///
/// Anchors (I/P) sit every `b_frames + 1` frames and on the last frame so the
/// GOP is closed; each anchor is decoded before the B-frames preceding it.
fn decode_order(gop_size: u32, b_frames: u32) -> Vec<usize> {
    let size = gop_size as usize;
    let step = b_frames as usize + 1;
    let mut order = Vec::with_capacity(size);
    order.push(0);
    let mut previous_anchor = 0;
    while previous_anchor + 1 < size {
        let anchor = (previous_anchor + step).min(size - 1);
        order.push(anchor);
        order.extend(previous_anchor + 1..anchor);
        previous_anchor = anchor;
    }
    order
}

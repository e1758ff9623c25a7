//! Buffer processor: the input and output hooks of the processing stage.
//!
//! `prepare_input` runs the ingress transform over every frame of a batch.
//! `prepare_output` matches output buffers with their frames, restores order
//! when relaying, and releases each frame from the registry as it is
//! finalized for the sink.

use log::{debug, warn};

use crate::error::Result;
use crate::frame::object::SymbolMapper;
use crate::frame::{Frame, FrameId, TranscodingMethod};
use crate::ingress::prepare_frame;
use crate::output::{OutputBuffer, OutputFrame, OutputMode, SinkVideoFrame};
use crate::registry::{BatchId, FrameRegistry, ReleasedFrame};
use crate::reorder::FrameReorderer;
use crate::source::{SourceInfo, SourceRegistry};

pub const PREPARE_INPUT_STAGE: &str = "prepare-input";
pub const PREPARE_OUTPUT_STAGE: &str = "prepare-output";

/// Frame slot of an input batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputBatchFrame {
    pub pts: i64,
    /// Index of the frame within its batch; `None` when the tag was lost.
    pub index: Option<usize>,
}

/// Batch entering the processing stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputBatch {
    pub pts: i64,
    /// Batch tag; `None` when the tag was lost.
    pub batch_id: Option<BatchId>,
    pub frames: Vec<InputBatchFrame>,
}

impl InputBatch {
    /// Batch whose frames are tagged `0..len`.
    pub fn tagged(batch_id: BatchId, pts: &[i64]) -> Self {
        Self {
            pts: pts.first().copied().unwrap_or(0),
            batch_id: Some(batch_id),
            frames: pts
                .iter()
                .enumerate()
                .map(|(index, pts)| InputBatchFrame {
                    pts: *pts,
                    index: Some(index),
                })
                .collect(),
        }
    }
}

pub struct BufferProcessor {
    mode: OutputMode,
    reorderer: FrameReorderer<OutputFrame>,
    symbols: SymbolMapper,
}

impl BufferProcessor {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            reorderer: FrameReorderer::new(mode.reorders()),
            symbols: SymbolMapper::new(),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn pending_len(&self, source_id: &str) -> usize {
        self.reorderer.pending_len(source_id)
    }

    /// Apply the ingress transform to every tagged frame of the batch.
    ///
    /// Untagged batches and frames are logged and skipped. Returns the number
    /// of frames prepared.
    pub fn prepare_input(
        &mut self,
        batch: &InputBatch,
        registry: &mut FrameRegistry,
        sources: &SourceRegistry,
    ) -> Result<usize> {
        debug!("preparing input for buffer with pts {}", batch.pts);
        let Some(batch_id) = batch.batch_id else {
            warn!(
                "failed to prepare input for batch at buffer {}: batch is not tagged",
                batch.pts
            );
            return Ok(0);
        };

        let pass_through = self.mode.is_pass_through();
        let mut prepared = 0;
        for slot in &batch.frames {
            let Some(index) = slot.index else {
                warn!(
                    "failed to prepare input for frame {} at buffer {}: frame is not tagged",
                    slot.pts, batch.pts
                );
                continue;
            };
            let frame_id = registry.batched_frame_id(batch_id, index)?;
            registry.span_mut(frame_id)?.record_stage(PREPARE_INPUT_STAGE);
            let frame = registry.get_mut(frame_id)?;
            let source = sources.get_source(&frame.source_id)?;
            prepare_frame(frame, source, &mut self.symbols, pass_through);
            prepared += 1;
        }
        Ok(prepared)
    }

    /// Turn an output buffer into finalized sink frames, in emission order.
    ///
    /// Emitted frames are deleted from the registry. In pass-through mode
    /// frames may be held back until their predecessor is emitted.
    pub fn prepare_output(
        &mut self,
        buffer: OutputBuffer,
        source: &SourceInfo,
        registry: &mut FrameRegistry,
    ) -> Result<Vec<SinkVideoFrame>> {
        debug!(
            "preparing output for buffer with pts {:?} for source {}",
            buffer.pts(),
            source.source_id
        );
        let mut finalized = Vec::new();
        for output in buffer.into_output_frames(&self.mode) {
            let Some(frame_id) = output.idx else {
                warn!(
                    "output frame {} of source {} is not tagged; skipping",
                    output.pts, source.source_id
                );
                continue;
            };
            registry.span_mut(frame_id)?.record_stage(PREPARE_OUTPUT_STAGE);
            let frame = registry.get(frame_id)?;
            let (keyframe, previous) = if self.reorderer.is_enabled() {
                (frame.keyframe, frame.previous_frame_id())
            } else {
                (output.keyframe, Ok(None))
            };
            for (ready_id, ready) in
                self.reorderer
                    .push(&source.source_id, frame_id, keyframe, previous, output)
            {
                finalized.push(self.finalize(ready_id, ready, source, registry)?);
            }
        }
        Ok(finalized)
    }

    /// Release every frame still held back for the source.
    pub fn on_eos(
        &mut self,
        source: &SourceInfo,
        registry: &mut FrameRegistry,
    ) -> Result<Vec<SinkVideoFrame>> {
        let mut finalized = Vec::new();
        for (frame_id, output) in self.reorderer.on_eos(&source.source_id) {
            finalized.push(self.finalize(frame_id, output, source, registry)?);
        }
        Ok(finalized)
    }

    fn finalize(
        &self,
        frame_id: FrameId,
        output: OutputFrame,
        source: &SourceInfo,
        registry: &mut FrameRegistry,
    ) -> Result<SinkVideoFrame> {
        let ReleasedFrame { mut frame, span } = registry.delete(frame_id)?;
        debug!(
            "finalizing frame {} of source {} (pts {}, dts {:?})",
            frame_id, source.source_id, frame.pts, output.dts
        );

        let content = if self.mode.is_pass_through() {
            let content = frame.content.take_internal();
            match &content {
                Some(data) => debug!("relaying frame {} unchanged: {} bytes", frame_id, data.len()),
                None => debug!("relaying frame {} unchanged: no content", frame_id),
            }
            frame.transcoding_method = TranscodingMethod::Copy;
            scale_to_native(&mut frame, source);
            content
        } else {
            frame.width = source.output_width();
            frame.height = source.output_height();
            frame.dts = output.dts;
            if let Some(codec) = output.codec {
                frame.codec = Some(codec.name().to_string());
            }
            frame.keyframe = output.keyframe;
            frame.transcoding_method = TranscodingMethod::Encoded;
            output.content
        };

        Ok(SinkVideoFrame {
            frame,
            content,
            span_context: span.propagate(),
        })
    }
}

/// Relayed frames keep their native size, so object boxes go back to native
/// coordinates.
fn scale_to_native(frame: &mut Frame, source: &SourceInfo) {
    if frame.width == source.processing_width() && frame.height == source.processing_height() {
        return;
    }
    let scale_x = frame.width as f32 / source.processing_width() as f32;
    let scale_y = frame.height as f32 / source.processing_height() as f32;
    for obj in &mut frame.processing_objects {
        obj.bbox.scale(scale_x, scale_y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::frame::{FrameContent, FrameLinkage};
    use crate::geometry::{BBox, ObjectBox, Resolution};
    use crate::output::{EncodedBuffer, RawBatchEntry};
    use crate::source::SourceShape;

    fn sources(width: u32, height: u32) -> SourceRegistry {
        let mut sources = SourceRegistry::new();
        let info = sources.init_source("cam-1", SourceShape::new(width, height));
        info.src_resolution = Some(Resolution {
            width: 1920,
            height: 1080,
        });
        sources
    }

    fn encoded(frame_idx: Option<FrameId>, pts: i64) -> OutputBuffer {
        OutputBuffer::Encoded(EncodedBuffer {
            frame_idx,
            pts,
            dts: Some(pts - 1),
            data: vec![7; 3],
            delta_unit: false,
        })
    }

    #[test]
    fn prepare_input_transforms_batched_frames() -> anyhow::Result<()> {
        let sources = sources(960, 540);
        let mut registry = FrameRegistry::new();
        let a = registry.create(Frame::new("cam-1", 0, 1920, 1080));
        let b = registry.create(Frame::new("cam-1", 40, 1920, 1080));
        let batch_id = registry.create_batch(&[a, b])?;

        let mut processor = BufferProcessor::new(OutputMode::Encoded { codec: Codec::H264 });
        let mut batch = InputBatch::tagged(batch_id, &[0, 40]);
        batch.frames.push(InputBatchFrame { pts: 80, index: None });
        assert_eq!(processor.prepare_input(&batch, &mut registry, &sources)?, 2);

        for id in [a, b] {
            let frame = registry.get(id)?;
            assert_eq!(frame.processing_objects.len(), 1);
            assert_eq!(frame.last_transformation_size(), Some((960, 540)));
        }
        Ok(())
    }

    #[test]
    fn untagged_batch_is_skipped() -> anyhow::Result<()> {
        let sources = sources(960, 540);
        let mut registry = FrameRegistry::new();
        let mut processor = BufferProcessor::new(OutputMode::MetadataOnly);
        let batch = InputBatch {
            pts: 0,
            batch_id: None,
            frames: vec![],
        };
        assert_eq!(processor.prepare_input(&batch, &mut registry, &sources)?, 0);
        Ok(())
    }

    #[test]
    fn encoded_output_rewrites_frame_and_releases_it() -> anyhow::Result<()> {
        let sources = sources(960, 540);
        let source = sources.get_source("cam-1")?;
        let mut registry = FrameRegistry::new();
        let id = registry.create(Frame::new("cam-1", 10, 1920, 1080).with_codec("hevc"));

        let mut processor = BufferProcessor::new(OutputMode::Encoded { codec: Codec::H264 });
        let out = processor.prepare_output(encoded(Some(id), 10), source, &mut registry)?;

        assert_eq!(out.len(), 1);
        let sink_frame = &out[0];
        assert_eq!((sink_frame.frame.width, sink_frame.frame.height), (960, 540));
        assert_eq!(sink_frame.frame.codec.as_deref(), Some("h264"));
        assert_eq!(sink_frame.frame.dts, Some(9));
        assert!(sink_frame.frame.keyframe);
        assert_eq!(sink_frame.frame.transcoding_method, TranscodingMethod::Encoded);
        assert_eq!(sink_frame.content, Some(vec![7; 3]));
        assert!(registry.is_empty());
        Ok(())
    }

    #[test]
    fn untagged_output_is_skipped() -> anyhow::Result<()> {
        let sources = sources(960, 540);
        let source = sources.get_source("cam-1")?;
        let mut registry = FrameRegistry::new();
        registry.create(Frame::new("cam-1", 10, 1920, 1080));
        let mut processor = BufferProcessor::new(OutputMode::Encoded { codec: Codec::H264 });
        assert!(processor
            .prepare_output(encoded(None, 10), source, &mut registry)?
            .is_empty());
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[test]
    fn pass_through_reorders_and_relays_content() -> anyhow::Result<()> {
        let sources = sources(960, 540);
        let source = sources.get_source("cam-1")?;
        let mut registry = FrameRegistry::new();
        let content = |byte: u8| FrameContent::Internal { data: vec![byte] };

        // Decode order I P B: ids 1, 2, 3; presentation order 1, 3, 2.
        let i = registry.create(
            Frame::new("cam-1", 0, 1920, 1080)
                .with_keyframe(true)
                .with_content(content(1))
                .with_linkage(FrameLinkage::Unlinked),
        );
        let p = registry.create(
            Frame::new("cam-1", 80, 1920, 1080)
                .with_content(content(2))
                .with_linkage(FrameLinkage::After(3)),
        );
        let b = registry.create(
            Frame::new("cam-1", 40, 1920, 1080)
                .with_content(content(3))
                .with_linkage(FrameLinkage::After(i)),
        );

        let mut processor = BufferProcessor::new(OutputMode::PassThrough);
        let raw = |idx| {
            OutputBuffer::RawBatch(vec![RawBatchEntry {
                frame_idx: Some(idx),
                pts: 0,
                data: Vec::new(),
            }])
        };
        let mut emitted = Vec::new();
        for id in [i, p, b] {
            emitted.extend(processor.prepare_output(raw(id), source, &mut registry)?);
        }

        let order: Vec<i64> = emitted.iter().map(|f| f.frame.pts).collect();
        assert_eq!(order, vec![0, 40, 80]);
        assert_eq!(emitted[2].content, Some(vec![2]));
        assert_eq!(emitted[2].frame.content, FrameContent::None);
        assert!(emitted
            .iter()
            .all(|f| f.frame.transcoding_method == TranscodingMethod::Copy
                && f.frame.width == 1920));
        assert!(registry.is_empty());
        Ok(())
    }

    #[test]
    fn pass_through_scales_objects_back_to_native() -> anyhow::Result<()> {
        let sources = sources(960, 540);
        let source = sources.get_source("cam-1")?;
        let mut registry = FrameRegistry::new();
        let id = registry.create(
            Frame::new("cam-1", 0, 1920, 1080)
                .with_keyframe(true)
                .with_linkage(FrameLinkage::Unlinked),
        );
        let batch_id = registry.create_batch(&[id])?;
        let mut processor = BufferProcessor::new(OutputMode::PassThrough);
        processor.prepare_input(&InputBatch::tagged(batch_id, &[0]), &mut registry, &sources)?;

        let out = processor.prepare_output(
            OutputBuffer::RawBatch(vec![RawBatchEntry {
                frame_idx: Some(id),
                pts: 0,
                data: Vec::new(),
            }]),
            source,
            &mut registry,
        )?;
        let primary = out[0].frame.primary_object().map(|obj| obj.bbox);
        assert_eq!(
            primary,
            Some(ObjectBox::Regular(BBox::new(960.0, 540.0, 1920.0, 1080.0)))
        );
        Ok(())
    }

    #[test]
    fn eos_releases_held_frames() -> anyhow::Result<()> {
        let sources = sources(960, 540);
        let source = sources.get_source("cam-1")?;
        let mut registry = FrameRegistry::new();
        let i = registry.create(
            Frame::new("cam-1", 0, 1920, 1080)
                .with_keyframe(true)
                .with_linkage(FrameLinkage::Unlinked),
        );
        // Its predecessor never arrives.
        let orphan =
            registry.create(Frame::new("cam-1", 80, 1920, 1080).with_linkage(FrameLinkage::After(99)));

        let mut processor = BufferProcessor::new(OutputMode::PassThrough);
        for id in [i, orphan] {
            processor.prepare_output(
                OutputBuffer::RawBatch(vec![RawBatchEntry {
                    frame_idx: Some(id),
                    pts: 0,
                    data: Vec::new(),
                }]),
                source,
                &mut registry,
            )?;
        }
        assert_eq!(processor.pending_len("cam-1"), 1);
        assert_eq!(registry.len(), 1);

        let flushed = processor.on_eos(source, &mut registry)?;
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].frame.id, orphan);
        assert!(registry.is_empty());
        Ok(())
    }
}

//! Pipeline facade driven by the event-processing thread.
//!
//! Owns the frame and source registries, the shape resolver and the buffer
//! processor, and feeds finalized messages into the sink queue. Every method
//! takes `&mut self`: one pipeline is driven from one thread.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::RelayConfig;
use crate::error::PipelineError;
use crate::frame::{Frame, FrameId, FrameLinkage};
use crate::output::{OutputBuffer, OutputMode, SinkMessage, SinkVideoFrame};
use crate::processor::{BufferProcessor, InputBatch};
use crate::registry::{BatchId, FrameRegistry, SpanSampler};
use crate::sink::SinkSender;
use crate::source::{SourceInfo, SourceLock, SourceRegistry, SourceShape, SourceShaper};

/// Outcome of [`Pipeline::shutdown`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub sources_closed: Vec<String>,
    /// Frames still registered after every source was flushed.
    pub leaked_frames: Vec<FrameId>,
}

pub struct Pipeline {
    frames: FrameRegistry,
    sources: SourceRegistry,
    shaper: Box<dyn SourceShaper>,
    processor: BufferProcessor,
    sink: Option<SinkSender>,
    batch_frames: bool,
}

impl Pipeline {
    pub fn new(
        mode: OutputMode,
        shaper: Box<dyn SourceShaper>,
        sampler: SpanSampler,
        sink: SinkSender,
    ) -> Self {
        info!(
            "pipeline output mode {} with {} source shaper",
            mode.name(),
            shaper.name()
        );
        Self {
            frames: FrameRegistry::with_sampler(sampler),
            sources: SourceRegistry::new(),
            shaper,
            processor: BufferProcessor::new(mode),
            sink: Some(sink),
            batch_frames: false,
        }
    }

    pub fn from_config(config: &RelayConfig, sink: SinkSender) -> Result<Self> {
        let pipeline = Self::new(
            config.output_mode()?,
            config.source_shaper()?,
            config.span_sampler(),
            sink,
        );
        Ok(pipeline.with_batch_output(config.output.batch_frames))
    }

    /// Group the frames finalized from one output buffer into a single batch
    /// message.
    pub fn with_batch_output(mut self, batch_frames: bool) -> Self {
        self.batch_frames = batch_frames;
        self
    }

    pub fn mode(&self) -> OutputMode {
        self.processor.mode()
    }

    pub fn frames(&self) -> &FrameRegistry {
        &self.frames
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn pending_len(&self, source_id: &str) -> usize {
        self.processor.pending_len(source_id)
    }

    // ------------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------------

    /// Resolve the processing shape of the frame's source and register it.
    pub fn init_source(&mut self, first_frame: &Frame) -> Result<&SourceInfo> {
        let source_id = first_frame.source_id.as_str();
        let resolved = self
            .shaper
            .resolve(source_id, first_frame.width, first_frame.height, first_frame)
            .with_context(|| format!("resolve shape of source {}", source_id))?;
        let shape = match resolved {
            Some(shape) => {
                shape.validate(self.shaper.geometry_base())?;
                shape
            }
            None => {
                let native = SourceShape::new(first_frame.width, first_frame.height);
                native.validate(1)?;
                native
            }
        };
        let info = self.sources.init_source(source_id, shape);
        info.src_resolution = Some(first_frame.resolution());
        info!(
            "source {} initialised: native {}x{}, processing {}x{}, output {}x{}",
            source_id,
            first_frame.width,
            first_frame.height,
            info.processing_width(),
            info.processing_height(),
            info.output_width(),
            info.output_height()
        );
        Ok(info)
    }

    /// Attach a source to its multiplexer pad; wakes waiters on its lock.
    pub fn attach_pad(&mut self, source_id: &str, pad_idx: u32) -> Result<()> {
        self.sources.attach_pad(source_id, pad_idx)?;
        debug!("source {} attached to pad {}", source_id, pad_idx);
        Ok(())
    }

    pub fn source_lock(&self, source_id: &str) -> Result<SourceLock> {
        Ok(self.sources.get_source(source_id)?.lock.clone())
    }

    // ------------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------------

    /// Register a frame, initialising its source on first sight. Frames with a
    /// zero dimension are rejected.
    pub fn create_frame(&mut self, frame: Frame) -> Result<FrameId> {
        if frame.width == 0 || frame.height == 0 {
            return Err(PipelineError::InvalidShape(format!(
                "frame of source {} is {}x{}",
                frame.source_id, frame.width, frame.height
            ))
            .into());
        }
        if !self.sources.contains(&frame.source_id) {
            self.init_source(&frame)?;
        }
        Ok(self.frames.create(frame))
    }

    /// Record the presentation-order predecessor of a registered frame.
    pub fn set_previous_frame_id(
        &mut self,
        frame_id: FrameId,
        previous: Option<FrameId>,
    ) -> Result<()> {
        let frame = self.frames.get_mut(frame_id)?;
        frame.linkage = match previous {
            Some(previous) => FrameLinkage::After(previous),
            None => FrameLinkage::Unlinked,
        };
        Ok(())
    }

    pub fn create_batch(&mut self, frame_ids: &[FrameId]) -> Result<BatchId> {
        Ok(self.frames.create_batch(frame_ids)?)
    }

    // ------------------------------------------------------------------------
    // Buffer hooks
    // ------------------------------------------------------------------------

    pub fn prepare_input(&mut self, batch: &InputBatch) -> Result<usize> {
        Ok(self
            .processor
            .prepare_input(batch, &mut self.frames, &self.sources)?)
    }

    /// Finalize the frames of an output buffer and enqueue them for the sink.
    /// Returns the number of frames sent.
    pub fn prepare_output(&mut self, source_id: &str, buffer: OutputBuffer) -> Result<usize> {
        let source = self.sources.get_source(source_id)?;
        let finalized = self
            .processor
            .prepare_output(buffer, source, &mut self.frames)?;
        self.send_frames(finalized)
    }

    /// Same as [`Pipeline::prepare_output`], addressing the source by pad.
    pub fn prepare_output_for_pad(&mut self, pad_idx: u32, buffer: OutputBuffer) -> Result<usize> {
        let source_id = self.sources.get_id_by_pad_index(pad_idx)?.to_string();
        self.prepare_output(&source_id, buffer)
    }

    /// Flush frames held for the source, send its end-of-stream marker and
    /// forget the source.
    pub fn on_eos(&mut self, source_id: &str) -> Result<usize> {
        let source = self.sources.get_source(source_id)?;
        let flushed = self.processor.on_eos(source, &mut self.frames)?;
        let sent = self.send_frames(flushed)?;
        self.send(SinkMessage::EndOfStream {
            source_id: source_id.to_string(),
        })?;
        self.sources.remove_source(source_id)?;
        info!("source {} ended; {} frames flushed", source_id, sent);
        Ok(sent)
    }

    /// End every remaining source, force-delete leftover frames and close the
    /// sink queue.
    pub fn shutdown(mut self) -> Result<ShutdownReport> {
        let mut report = ShutdownReport::default();
        for source_id in self.sources.source_ids() {
            self.on_eos(&source_id)?;
            report.sources_closed.push(source_id);
        }
        for frame_id in self.frames.frame_ids() {
            let released = self.frames.delete(frame_id)?;
            warn!(
                "frame {} of source {} was never emitted; deleted at shutdown",
                frame_id, released.frame.source_id
            );
            report.leaked_frames.push(frame_id);
        }
        self.sink = None;
        info!(
            "pipeline stopped: {} sources closed, {} frames leaked",
            report.sources_closed.len(),
            report.leaked_frames.len()
        );
        Ok(report)
    }

    fn send_frames(&self, frames: Vec<SinkVideoFrame>) -> Result<usize> {
        let count = frames.len();
        if count == 0 {
            return Ok(0);
        }
        if self.batch_frames {
            self.send(SinkMessage::Batch { frames })?;
        } else {
            for frame in frames {
                self.send(SinkMessage::VideoFrame(frame))?;
            }
        }
        Ok(count)
    }

    fn send(&self, message: SinkMessage) -> Result<()> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| anyhow!("pipeline sink already closed"))?;
        sink.send(message)?;
        Ok(())
    }
}

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::error::{PipelineError, Result};
use crate::frame::{Frame, FrameId};

use super::span::{ClosedSpan, FrameSpan, SpanSampler};

/// Identifier of a group of frames processed together by batched inference.
pub type BatchId = u64;

struct FrameEntry {
    frame: Frame,
    span: FrameSpan,
    batch: Option<BatchId>,
}

struct BatchEntry {
    frames: Vec<FrameId>,
    live: usize,
}

/// Frame and span handed back by [`FrameRegistry::delete`].
#[derive(Debug)]
pub struct ReleasedFrame {
    pub frame: Frame,
    pub span: ClosedSpan,
}

/// Owner of every in-flight frame.
///
/// Ids are monotonic and never reused. Each successful `create` must be paired
/// with exactly one `delete`; a second `delete` of the same id fails with
/// `FrameNotFound`.
///
/// Not synchronized: the registry is driven from the single event-processing
/// thread of a pipeline.
pub struct FrameRegistry {
    next_frame_id: FrameId,
    next_batch_id: BatchId,
    frames: HashMap<FrameId, FrameEntry>,
    batches: HashMap<BatchId, BatchEntry>,
    sampler: SpanSampler,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::with_sampler(SpanSampler::disabled())
    }

    pub fn with_sampler(sampler: SpanSampler) -> Self {
        Self {
            next_frame_id: 1,
            next_batch_id: 1,
            frames: HashMap::new(),
            batches: HashMap::new(),
            sampler,
        }
    }

    /// Register a frame and return its new id.
    pub fn create(&mut self, mut frame: Frame) -> FrameId {
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        frame.id = id;
        debug!(
            "registered frame {} of source {} (pts {})",
            id, frame.source_id, frame.pts
        );
        let span = self.sampler.next_span();
        self.frames.insert(
            id,
            FrameEntry {
                frame,
                span,
                batch: None,
            },
        );
        id
    }

    pub fn get(&self, id: FrameId) -> Result<&Frame> {
        self.frames
            .get(&id)
            .map(|entry| &entry.frame)
            .ok_or(PipelineError::FrameNotFound(id))
    }

    pub fn get_mut(&mut self, id: FrameId) -> Result<&mut Frame> {
        self.frames
            .get_mut(&id)
            .map(|entry| &mut entry.frame)
            .ok_or(PipelineError::FrameNotFound(id))
    }

    pub fn span_mut(&mut self, id: FrameId) -> Result<&mut FrameSpan> {
        self.frames
            .get_mut(&id)
            .map(|entry| &mut entry.span)
            .ok_or(PipelineError::FrameNotFound(id))
    }

    pub fn contains(&self, id: FrameId) -> bool {
        self.frames.contains_key(&id)
    }

    /// Remove the frame and close its span.
    pub fn delete(&mut self, id: FrameId) -> Result<ReleasedFrame> {
        let entry = self
            .frames
            .remove(&id)
            .ok_or(PipelineError::FrameNotFound(id))?;
        if let Some(batch_id) = entry.batch {
            self.release_batch_member(batch_id);
        }
        debug!("deleted frame {} of source {}", id, entry.frame.source_id);
        Ok(ReleasedFrame {
            frame: entry.frame,
            span: entry.span.close(id),
        })
    }

    // ------------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------------

    /// Group registered frames into a batch. Indices within the batch follow
    /// the order of `ids`.
    ///
    /// A frame belongs to at most one batch; re-batching moves it and the old
    /// batch no longer resolves it. Empty batches and repeated ids are
    /// rejected.
    pub fn create_batch(&mut self, ids: &[FrameId]) -> Result<BatchId> {
        if ids.is_empty() {
            return Err(PipelineError::InvalidBatch("no frames".to_string()));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(repeated) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(PipelineError::InvalidBatch(format!(
                "frame {} listed twice",
                repeated
            )));
        }
        if let Some(missing) = ids.iter().find(|id| !self.frames.contains_key(id)) {
            return Err(PipelineError::FrameNotFound(*missing));
        }
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;

        for id in ids {
            let previous = self
                .frames
                .get_mut(id)
                .and_then(|entry| entry.batch.replace(batch_id));
            if let Some(previous) = previous {
                self.release_batch_member(previous);
            }
        }
        self.batches.insert(
            batch_id,
            BatchEntry {
                frames: ids.to_vec(),
                live: ids.len(),
            },
        );
        debug!("registered batch {} with {} frames", batch_id, ids.len());
        Ok(batch_id)
    }

    pub fn batch(&self, batch_id: BatchId) -> Result<&[FrameId]> {
        self.batches
            .get(&batch_id)
            .map(|batch| batch.frames.as_slice())
            .ok_or(PipelineError::BatchNotFound(batch_id))
    }

    /// Resolve an index within a batch to its frame id.
    ///
    /// Fails with `StaleBatchMember` when the frame has since joined another
    /// batch. A deleted member resolves to its id; fetching it then fails with
    /// `FrameNotFound`.
    pub fn batched_frame_id(&self, batch_id: BatchId, index: usize) -> Result<FrameId> {
        let frame_id = self
            .batch(batch_id)?
            .get(index)
            .copied()
            .ok_or(PipelineError::BatchIndexOutOfRange { batch_id, index })?;
        match self.frames.get(&frame_id) {
            Some(entry) if entry.batch != Some(batch_id) => {
                Err(PipelineError::StaleBatchMember { batch_id, frame_id })
            }
            _ => Ok(frame_id),
        }
    }

    pub fn get_batched(&self, batch_id: BatchId, index: usize) -> Result<&Frame> {
        let id = self.batched_frame_id(batch_id, index)?;
        self.get(id)
    }

    fn release_batch_member(&mut self, batch_id: BatchId) {
        let drained = match self.batches.get_mut(&batch_id) {
            Some(batch) => {
                batch.live = batch.live.saturating_sub(1);
                batch.live == 0
            }
            None => false,
        };
        if drained {
            self.batches.remove(&batch_id);
            debug!("batch {} released", batch_id);
        }
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Ids of all registered frames, ascending.
    pub fn frame_ids(&self) -> Vec<FrameId> {
        let mut ids: Vec<FrameId> = self.frames.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for FrameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameLinkage;

    fn frame(source: &str, pts: i64) -> Frame {
        Frame::new(source, pts, 640, 480).with_linkage(FrameLinkage::Unlinked)
    }

    #[test]
    fn get_returns_stored_frame_until_delete() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::new();
        let stored = frame("cam-1", 40).with_keyframe(true).with_dts(38);
        let id = registry.create(stored.clone());

        let mut expected = stored;
        expected.id = id;
        assert_eq!(registry.get(id)?, &expected);

        let released = registry.delete(id)?;
        assert_eq!(released.frame, expected);
        assert_eq!(released.span.frame_id, id);
        assert!(matches!(
            registry.get(id),
            Err(PipelineError::FrameNotFound(missing)) if missing == id
        ));
        Ok(())
    }

    #[test]
    fn double_delete_fails() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::new();
        let id = registry.create(frame("cam-1", 0));
        registry.delete(id)?;
        assert!(matches!(
            registry.delete(id),
            Err(PipelineError::FrameNotFound(_))
        ));
        assert!(registry.is_empty());
        Ok(())
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::new();
        let a = registry.create(frame("cam-1", 0));
        registry.delete(a)?;
        let b = registry.create(frame("cam-1", 1));
        let c = registry.create(frame("cam-2", 0));
        assert!(a < b && b < c);
        assert_eq!(registry.frame_ids(), vec![b, c]);
        Ok(())
    }

    #[test]
    fn batched_lookup_resolves_index() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::new();
        let a = registry.create(frame("cam-1", 0));
        let b = registry.create(frame("cam-2", 0));
        let batch = registry.create_batch(&[b, a])?;

        assert_eq!(registry.get_batched(batch, 0)?.id, b);
        assert_eq!(registry.get_batched(batch, 1)?.source_id, "cam-1");
        assert!(matches!(
            registry.get_batched(batch, 2),
            Err(PipelineError::BatchIndexOutOfRange { index: 2, .. })
        ));
        assert!(matches!(
            registry.get_batched(batch + 1, 0),
            Err(PipelineError::BatchNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn batch_is_released_with_its_last_frame() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::new();
        let a = registry.create(frame("cam-1", 0));
        let b = registry.create(frame("cam-1", 1));
        let batch = registry.create_batch(&[a, b])?;

        registry.delete(a)?;
        assert_eq!(registry.batch_count(), 1);
        assert!(matches!(
            registry.get_batched(batch, 0),
            Err(PipelineError::FrameNotFound(_))
        ));
        registry.delete(b)?;
        assert_eq!(registry.batch_count(), 0);
        Ok(())
    }

    #[test]
    fn batch_of_unknown_frame_is_rejected() {
        let mut registry = FrameRegistry::new();
        let a = registry.create(frame("cam-1", 0));
        assert!(matches!(
            registry.create_batch(&[a, 99]),
            Err(PipelineError::FrameNotFound(99))
        ));
        assert_eq!(registry.batch_count(), 0);
    }

    #[test]
    fn rebatching_moves_membership() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::new();
        let a = registry.create(frame("cam-1", 0));
        registry.create_batch(&[a])?;
        registry.create_batch(&[a])?;
        assert_eq!(registry.batch_count(), 1);
        registry.delete(a)?;
        assert_eq!(registry.batch_count(), 0);
        Ok(())
    }

    #[test]
    fn rebatched_frame_is_not_resolved_through_its_old_batch() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::new();
        let a = registry.create(frame("cam-1", 0));
        let b = registry.create(frame("cam-1", 1));
        let old = registry.create_batch(&[a, b])?;
        let new = registry.create_batch(&[a])?;

        assert!(matches!(
            registry.get_batched(old, 0),
            Err(PipelineError::StaleBatchMember { frame_id, .. }) if frame_id == a
        ));
        assert_eq!(registry.get_batched(old, 1)?.id, b);
        assert_eq!(registry.get_batched(new, 0)?.id, a);

        registry.delete(a)?;
        registry.delete(b)?;
        assert_eq!(registry.batch_count(), 0);
        Ok(())
    }

    #[test]
    fn repeated_ids_in_a_batch_are_rejected() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::new();
        let a = registry.create(frame("cam-1", 0));
        assert!(matches!(
            registry.create_batch(&[a, a]),
            Err(PipelineError::InvalidBatch(_))
        ));
        assert_eq!(registry.batch_count(), 0);

        registry.delete(a)?;
        assert!(registry.is_empty());
        assert_eq!(registry.batch_count(), 0);
        Ok(())
    }

    #[test]
    fn empty_batch_is_rejected() {
        let mut registry = FrameRegistry::new();
        assert!(matches!(
            registry.create_batch(&[]),
            Err(PipelineError::InvalidBatch(_))
        ));
        assert_eq!(registry.batch_count(), 0);
    }

    #[test]
    fn sampled_frames_close_real_spans() -> anyhow::Result<()> {
        let mut registry = FrameRegistry::with_sampler(SpanSampler::new(1, "relay"));
        let id = registry.create(frame("cam-1", 0));
        registry.span_mut(id)?.record_stage("prepare-input");
        let released = registry.delete(id)?;
        assert!(released.span.is_sampled());
        assert_eq!(released.span.stages().len(), 1);
        Ok(())
    }
}

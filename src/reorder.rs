//! Per-source presentation-order restoration.
//!
//! Pass-through relays of streams with B-frames emit frames in decode order.
//! The reorderer buffers a frame until the frame it follows has been emitted,
//! and flushes its backlog on every keyframe and at end of stream so a lost
//! frame never stalls a source.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use log::{trace, warn};

use crate::error::Result;
use crate::frame::FrameId;

/// Frame waiting for its predecessor.
struct PendingFrame<T> {
    frame_id: FrameId,
    previous_frame_id: FrameId,
    payload: T,
}

// Min-heap on `previous_frame_id`.
impl<T> Ord for PendingFrame<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.previous_frame_id.cmp(&self.previous_frame_id)
    }
}

impl<T> PartialOrd for PendingFrame<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for PendingFrame<T> {
    fn eq(&self, other: &Self) -> bool {
        self.previous_frame_id == other.previous_frame_id
    }
}

impl<T> Eq for PendingFrame<T> {}

struct SourceOrder<T> {
    last_emitted: Option<FrameId>,
    pending: BinaryHeap<PendingFrame<T>>,
}

impl<T> SourceOrder<T> {
    fn new() -> Self {
        Self {
            last_emitted: None,
            pending: BinaryHeap::new(),
        }
    }

    fn emit(&mut self, frame_id: FrameId, payload: T, out: &mut Vec<(FrameId, T)>) {
        self.last_emitted = Some(frame_id);
        out.push((frame_id, payload));
    }

    fn flush(&mut self, out: &mut Vec<(FrameId, T)>) {
        while let Some(pending) = self.pending.pop() {
            trace!(
                "flushing frame {} (follows {})",
                pending.frame_id,
                pending.previous_frame_id
            );
            out.push((pending.frame_id, pending.payload));
        }
    }

    fn drain_ready(&mut self, out: &mut Vec<(FrameId, T)>) {
        while self
            .pending
            .peek()
            .is_some_and(|top| Some(top.previous_frame_id) == self.last_emitted)
        {
            if let Some(ready) = self.pending.pop() {
                trace!(
                    "releasing frame {} after {}",
                    ready.frame_id,
                    ready.previous_frame_id
                );
                self.emit(ready.frame_id, ready.payload, out);
            }
        }
    }
}

/// Reorders frames of each source into presentation order.
///
/// `T` is whatever travels with the frame id to the output (the pipeline
/// passes the output buffer data). With reordering disabled every frame is
/// emitted as it arrives and no state is kept.
pub struct FrameReorderer<T> {
    enabled: bool,
    sources: HashMap<String, SourceOrder<T>>,
}

impl<T> FrameReorderer<T> {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            sources: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Handle one arriving frame and return the frames now ready, in order.
    ///
    /// `previous` is the frame's linkage lookup. A missing linkage is logged
    /// and the frame is emitted immediately.
    pub fn push(
        &mut self,
        source_id: &str,
        frame_id: FrameId,
        keyframe: bool,
        previous: Result<Option<FrameId>>,
        payload: T,
    ) -> Vec<(FrameId, T)> {
        if !self.enabled {
            return vec![(frame_id, payload)];
        }

        let state = self
            .sources
            .entry(source_id.to_string())
            .or_insert_with(SourceOrder::new);
        let mut out = Vec::new();

        if keyframe {
            trace!("keyframe {} of source {}", frame_id, source_id);
            state.flush(&mut out);
            state.emit(frame_id, payload, &mut out);
            return out;
        }

        let previous = match previous {
            Ok(previous) => previous,
            Err(e) => {
                warn!("{}; emitting frame without reordering", e);
                None
            }
        };
        match previous {
            None => {
                trace!("frame {} of source {} is unlinked", frame_id, source_id);
                state.emit(frame_id, payload, &mut out);
            }
            Some(previous) if Some(previous) == state.last_emitted => {
                trace!("frame {} follows {} in order", frame_id, previous);
                state.emit(frame_id, payload, &mut out);
            }
            Some(previous) => {
                trace!(
                    "buffering frame {} of source {} until {} is emitted",
                    frame_id,
                    source_id,
                    previous
                );
                state.pending.push(PendingFrame {
                    frame_id,
                    previous_frame_id: previous,
                    payload,
                });
            }
        }
        state.drain_ready(&mut out);
        out
    }

    /// Emit every frame still pending for the source and forget the source.
    pub fn on_eos(&mut self, source_id: &str) -> Vec<(FrameId, T)> {
        let mut out = Vec::new();
        if let Some(mut state) = self.sources.remove(source_id) {
            if !state.pending.is_empty() {
                warn!(
                    "source {} ended with {} frames awaiting predecessors",
                    source_id,
                    state.pending.len()
                );
            }
            state.flush(&mut out);
        }
        out
    }

    pub fn pending_len(&self, source_id: &str) -> usize {
        self.sources
            .get(source_id)
            .map(|state| state.pending.len())
            .unwrap_or(0)
    }

    pub fn last_emitted(&self, source_id: &str) -> Option<FrameId> {
        self.sources.get(source_id).and_then(|state| state.last_emitted)
    }

    /// Number of sources with ordering state.
    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    fn ids(out: Vec<(FrameId, ())>) -> Vec<FrameId> {
        out.into_iter().map(|(id, _)| id).collect()
    }

    fn push(r: &mut FrameReorderer<()>, id: FrameId, previous: Option<FrameId>) -> Vec<FrameId> {
        ids(r.push("cam-1", id, false, Ok(previous), ()))
    }

    #[test]
    fn restores_presentation_order() {
        let mut r = FrameReorderer::new(true);
        let mut emitted = ids(r.push("cam-1", 1, true, Ok(None), ()));
        emitted.extend(push(&mut r, 3, Some(2)));
        emitted.extend(push(&mut r, 2, Some(1)));
        emitted.extend(push(&mut r, 5, Some(4)));
        emitted.extend(push(&mut r, 4, Some(3)));
        assert_eq!(emitted, vec![1, 2, 3, 4, 5]);
        assert_eq!(r.pending_len("cam-1"), 0);
        assert_eq!(r.last_emitted("cam-1"), Some(5));
    }

    #[test]
    fn keyframe_flushes_backlog_first() {
        let mut r = FrameReorderer::new(true);
        ids(r.push("cam-1", 1, true, Ok(None), ()));
        assert!(push(&mut r, 3, Some(2)).is_empty());
        assert!(push(&mut r, 5, Some(4)).is_empty());
        assert_eq!(r.pending_len("cam-1"), 2);

        assert_eq!(ids(r.push("cam-1", 6, true, Ok(None), ())), vec![3, 5, 6]);
        assert_eq!(r.pending_len("cam-1"), 0);
        assert_eq!(push(&mut r, 7, Some(6)), vec![7]);
    }

    #[test]
    fn eos_flushes_and_forgets_source() {
        let mut r = FrameReorderer::new(true);
        ids(r.push("cam-1", 1, true, Ok(None), ()));
        push(&mut r, 9, Some(8));
        push(&mut r, 4, Some(3));
        assert_eq!(ids(r.on_eos("cam-1")), vec![4, 9]);
        assert_eq!(r.tracked_sources(), 0);
        assert!(r.on_eos("cam-1").is_empty());
    }

    #[test]
    fn missing_linkage_emits_immediately() {
        let mut r = FrameReorderer::new(true);
        ids(r.push("cam-1", 1, true, Ok(None), ()));
        push(&mut r, 3, Some(2));
        let out = r.push(
            "cam-1",
            2,
            false,
            Err(PipelineError::LinkageUnavailable { frame_id: 2 }),
            (),
        );
        // 2 becomes the last emitted frame, which releases 3.
        assert_eq!(ids(out), vec![2, 3]);
    }

    #[test]
    fn disabled_reorderer_keeps_no_state() {
        let mut r = FrameReorderer::new(false);
        assert_eq!(push(&mut r, 3, Some(2)), vec![3]);
        assert_eq!(push(&mut r, 2, Some(1)), vec![2]);
        assert_eq!(r.tracked_sources(), 0);
        assert!(!r.is_enabled());
    }

    #[test]
    fn sources_are_independent() {
        let mut r = FrameReorderer::new(true);
        ids(r.push("cam-1", 1, true, Ok(None), ()));
        ids(r.push("cam-2", 2, true, Ok(None), ()));
        assert!(ids(r.push("cam-1", 4, false, Ok(Some(3)), ())).is_empty());
        assert_eq!(ids(r.push("cam-2", 3, false, Ok(Some(2)), ())), vec![3]);
        assert_eq!(r.pending_len("cam-1"), 1);
        assert_eq!(r.pending_len("cam-2"), 0);
    }

    #[test]
    fn payload_travels_with_frame() {
        let mut r = FrameReorderer::new(true);
        r.push("cam-1", 1, true, Ok(None), "one");
        r.push("cam-1", 3, false, Ok(Some(2)), "three");
        let out = r.push("cam-1", 2, false, Ok(Some(1)), "two");
        assert_eq!(out, vec![(2, "two"), (3, "three")]);
    }
}

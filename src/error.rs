//! Typed errors for the frame relay core.
//!
//! Registry lookups that fail (`FrameNotFound`, `BatchNotFound`) signal a logic
//! error upstream and are expected to terminate the process once they reach
//! `main`. `LinkageUnavailable` is the only recoverable variant: the reordering
//! engine logs it and emits the frame immediately.

use crate::frame::FrameId;
use crate::registry::BatchId;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // ── Frame registry ───────────────────────────────────────────────
    #[error("frame {0} is not registered (unknown id or already deleted)")]
    FrameNotFound(FrameId),

    #[error("batch {0} is not registered")]
    BatchNotFound(BatchId),

    #[error("batch {batch_id} has no frame at index {index}")]
    BatchIndexOutOfRange { batch_id: BatchId, index: usize },

    #[error("frame {frame_id} was moved out of batch {batch_id}")]
    StaleBatchMember { batch_id: BatchId, frame_id: FrameId },

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    // ── Ordering ─────────────────────────────────────────────────────
    #[error("frame {frame_id} carries no linkage metadata")]
    LinkageUnavailable { frame_id: FrameId },

    // ── Configuration ────────────────────────────────────────────────
    #[error("invalid source shape: {0}")]
    InvalidShape(String),

    #[error("unknown codec: {0}")]
    UnknownCodec(String),

    // ── Sources ──────────────────────────────────────────────────────
    #[error("source {0} is not registered")]
    UnknownSource(String),

    #[error("no source is attached to pad {0}")]
    UnknownPadIndex(u32),

    // ── Sink ─────────────────────────────────────────────────────────
    #[error("sink queue closed")]
    SinkClosed,
}

impl PipelineError {
    /// True for conditions the pipeline degrades around instead of stopping.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::LinkageUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_linkage_errors_are_recoverable() {
        assert!(PipelineError::LinkageUnavailable { frame_id: 3 }.is_recoverable());
        assert!(!PipelineError::FrameNotFound(3).is_recoverable());
        assert!(!PipelineError::SinkClosed.is_recoverable());
    }

    #[test]
    fn messages_name_the_identifier() {
        let err = PipelineError::BatchIndexOutOfRange {
            batch_id: 7,
            index: 4,
        };
        assert_eq!(err.to_string(), "batch 7 has no frame at index 4");
    }
}

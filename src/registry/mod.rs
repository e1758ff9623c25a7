//! Frame registry: id assignment, frame ownership and tracing spans.

mod frames;
mod span;

pub use frames::{BatchId, FrameRegistry, ReleasedFrame};
pub use span::{ClosedSpan, FrameSpan, SpanContext, SpanSampler, StageMark};

//! Frame Relay
//!
//! Frame lifecycle and ordering core of a video analytics pipeline.
//!
//! # Architecture
//!
//! Frames enter through [`Pipeline::create_frame`], are transformed into
//! processing space before inference, and leave through the output hook into
//! a bounded sink queue. The core keeps four guarantees:
//!
//! 1. **Exactly-once release**: every registered frame is deleted exactly once,
//!    either when it is finalized for the sink or at shutdown.
//! 2. **Presentation order**: relayed frames of a source reach the sink in
//!    presentation order, even when they arrive in decode order.
//! 3. **No stalls**: a lost frame never blocks a source; keyframes and end of
//!    stream flush whatever is pending.
//! 4. **One primary object**: every prepared frame carries exactly one
//!    full-frame object.
//!
//! # Module Structure
//!
//! - `registry`: frame registry, batches and per-frame tracing spans
//! - `source`: source registry, shape resolution and readiness locks
//! - `ingress`: geometry and object metadata transform
//! - `reorder`: per-source presentation-order restoration
//! - `processor`: input/output buffer hooks
//! - `pipeline`: facade driven by the event thread
//! - `sink`: bounded queue and consumer thread
//! - `synthetic`: `stub://` B-frame source

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingress;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod reorder;
pub mod sink;
pub mod source;
pub mod synthetic;

pub use codec::Codec;
pub use config::RelayConfig;
pub use error::PipelineError;
pub use frame::object::{Attribute, AttributeValue, AttributeValueKind, ObjectMeta, VideoObject};
pub use frame::{Frame, FrameContent, FrameId, FrameLinkage, Transformation};
pub use geometry::{BBox, FramePadding, ObjectBox, RBBox, Resolution};
pub use output::{OutputBuffer, OutputMode, SinkMessage, SinkVideoFrame};
pub use pipeline::{Pipeline, ShutdownReport};
pub use processor::{BufferProcessor, InputBatch};
pub use registry::{BatchId, FrameRegistry};
pub use reorder::FrameReorderer;
pub use sink::{spawn_sink, JsonLinesSink, MemorySink, Sink, SinkStats};
pub use source::{SourceInfo, SourceRegistry, SourceShape, SourceShaper};
pub use synthetic::{SyntheticConfig, SyntheticSource};

//! Per-frame tracing spans.
//!
//! A span opens when the frame is registered and closes when it is deleted.
//! Only every `sampling_period`-th frame gets a real span; the rest carry a
//! no-op span that propagates an empty context.

use std::time::{Duration, Instant};

use rand::RngCore;
use serde::Serialize;

use crate::frame::FrameId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageMark {
    pub name: String,
    pub offset: Duration,
}

#[derive(Debug)]
struct ActiveSpan {
    name: String,
    trace_id: [u8; 16],
    span_id: [u8; 8],
    started: Instant,
    stages: Vec<StageMark>,
}

/// Open span of a registered frame.
#[derive(Debug)]
pub struct FrameSpan {
    inner: Option<ActiveSpan>,
}

impl FrameSpan {
    pub fn noop() -> Self {
        Self { inner: None }
    }

    fn start(name: &str) -> Self {
        let mut trace_id = [0u8; 16];
        let mut span_id = [0u8; 8];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut trace_id);
        rng.fill_bytes(&mut span_id);
        Self {
            inner: Some(ActiveSpan {
                name: name.to_string(),
                trace_id,
                span_id,
                started: Instant::now(),
                stages: Vec::new(),
            }),
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.inner.is_some()
    }

    /// Mark entry into a named processing stage.
    pub fn record_stage(&mut self, name: &str) {
        if let Some(span) = self.inner.as_mut() {
            span.stages.push(StageMark {
                name: name.to_string(),
                offset: span.started.elapsed(),
            });
        }
    }

    pub(crate) fn close(self, frame_id: FrameId) -> ClosedSpan {
        ClosedSpan {
            frame_id,
            inner: self.inner.map(|span| ClosedInner {
                elapsed: span.started.elapsed(),
                name: span.name,
                trace_id: span.trace_id,
                span_id: span.span_id,
                stages: span.stages,
            }),
        }
    }
}

#[derive(Clone, Debug)]
struct ClosedInner {
    name: String,
    trace_id: [u8; 16],
    span_id: [u8; 8],
    elapsed: Duration,
    stages: Vec<StageMark>,
}

/// Span data released together with a deleted frame.
#[derive(Clone, Debug)]
pub struct ClosedSpan {
    pub frame_id: FrameId,
    inner: Option<ClosedInner>,
}

impl ClosedSpan {
    pub fn is_sampled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.as_ref().map(|span| span.name.as_str())
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.as_ref().map(|span| span.elapsed)
    }

    pub fn stages(&self) -> &[StageMark] {
        self.inner
            .as_ref()
            .map(|span| span.stages.as_slice())
            .unwrap_or(&[])
    }

    /// W3C trace context to forward with the sink message.
    pub fn propagate(&self) -> SpanContext {
        SpanContext {
            traceparent: self.inner.as_ref().map(|span| {
                format!(
                    "00-{}-{}-01",
                    hex::encode(span.trace_id),
                    hex::encode(span.span_id)
                )
            }),
        }
    }
}

/// Propagated trace context. Empty for unsampled frames.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SpanContext {
    pub traceparent: Option<String>,
}

impl SpanContext {
    pub fn trace_id(&self) -> Option<&str> {
        self.traceparent
            .as_deref()
            .and_then(|value| value.split('-').nth(1))
    }
}

/// Decides which frames get a real span.
#[derive(Debug)]
pub struct SpanSampler {
    period: u64,
    root_name: String,
    counter: u64,
}

impl SpanSampler {
    /// `period == 0` disables sampling.
    pub fn new(period: u64, root_name: &str) -> Self {
        Self {
            period,
            root_name: root_name.to_string(),
            counter: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, "")
    }

    pub fn next_span(&mut self) -> FrameSpan {
        if self.period == 0 {
            return FrameSpan::noop();
        }
        let sampled = self.counter % self.period == 0;
        self.counter = self.counter.wrapping_add(1);
        if sampled {
            FrameSpan::start(&self.root_name)
        } else {
            FrameSpan::noop()
        }
    }
}

//! Sink side: a bounded queue drained by one consumer thread.
//!
//! The producer (pipeline event thread) blocks when the queue is full; the
//! worker writes every message to a [`Sink`] until all senders are dropped.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info};
use serde::Serialize;

use crate::error::PipelineError;
use crate::output::SinkMessage;

pub const DEFAULT_QUEUE_LENGTH: usize = 100;

/// Destination of finalized messages.
pub trait Sink: Send {
    fn name(&self) -> &'static str;

    fn write(&mut self, message: &SinkMessage) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes each message as one JSON document per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn name(&self) -> &'static str {
        "json-lines"
    }

    fn write(&mut self, message: &SinkMessage) -> Result<()> {
        serde_json::to_writer(&mut self.writer, message).context("serialize sink message")?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps messages in memory; clones share the same store.
#[derive(Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<SinkMessage>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the messages received so far.
    pub fn messages(&self) -> Vec<SinkMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&mut self, message: &SinkMessage) -> Result<()> {
        self.messages
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub messages: u64,
    pub frames: u64,
    pub batches: u64,
    pub eos: u64,
}

impl SinkStats {
    fn record(&mut self, message: &SinkMessage) {
        self.messages += 1;
        self.frames += message.frame_count() as u64;
        match message {
            SinkMessage::Batch { .. } => self.batches += 1,
            SinkMessage::EndOfStream { .. } => self.eos += 1,
            SinkMessage::VideoFrame(_) => {}
        }
    }
}

/// Producer handle of the sink queue.
#[derive(Clone)]
pub struct SinkSender {
    tx: Sender<SinkMessage>,
}

impl SinkSender {
    /// Enqueue a message, blocking while the queue is full.
    pub fn send(&self, message: SinkMessage) -> crate::error::Result<()> {
        self.tx.send(message).map_err(|_| PipelineError::SinkClosed)
    }
}

/// Consumer thread draining the queue into a sink.
pub struct SinkWorker {
    handle: JoinHandle<Result<SinkStats>>,
}

impl SinkWorker {
    /// Wait for the worker to drain the queue. Returns once every
    /// [`SinkSender`] has been dropped.
    pub fn join(self) -> Result<SinkStats> {
        self.handle
            .join()
            .map_err(|_| anyhow!("sink worker panicked"))?
    }
}

/// Start a worker thread writing to `sink` through a queue of `capacity`.
pub fn spawn_sink<S: Sink + 'static>(sink: S, capacity: usize) -> Result<(SinkSender, SinkWorker)> {
    if capacity == 0 {
        return Err(anyhow!("sink queue length must be greater than zero"));
    }
    let (tx, rx) = bounded(capacity);
    let handle = thread::Builder::new()
        .name("relay-sink".to_string())
        .spawn(move || drain(sink, rx))
        .context("spawn sink worker")?;
    Ok((SinkSender { tx }, SinkWorker { handle }))
}

fn drain<S: Sink>(mut sink: S, rx: Receiver<SinkMessage>) -> Result<SinkStats> {
    info!("sink worker started ({})", sink.name());
    let mut stats = SinkStats::default();
    for message in rx.iter() {
        debug!("sink received {}", message.kind());
        sink.write(&message)
            .with_context(|| format!("write {} to {} sink", message.kind(), sink.name()))?;
        stats.record(&message);
        if matches!(message, SinkMessage::EndOfStream { .. }) {
            sink.flush()?;
        }
    }
    sink.flush()?;
    info!(
        "sink worker stopped: {} messages, {} frames, {} eos",
        stats.messages, stats.frames, stats.eos
    );
    Ok(stats)
}

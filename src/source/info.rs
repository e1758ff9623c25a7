use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::geometry::{FramePadding, Resolution};

/// Processing frame shape of a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceShape {
    pub width: u32,
    pub height: u32,
    pub padding: Option<FramePadding>,
}

impl SourceShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            padding: None,
        }
    }

    pub fn with_padding(mut self, padding: FramePadding) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Non-empty padding, if configured.
    pub fn effective_padding(&self) -> Option<&FramePadding> {
        self.padding.as_ref().filter(|padding| !padding.is_empty())
    }

    /// Check every dimension against the geometry base.
    pub fn validate(&self, geometry_base: u32) -> Result<()> {
        if geometry_base == 0 {
            return Err(PipelineError::InvalidShape(
                "geometry base must be greater than zero".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidShape(format!(
                "shape {}x{} has a zero dimension",
                self.width, self.height
            )));
        }
        let mut dims = vec![("width", self.width), ("height", self.height)];
        if let Some(padding) = &self.padding {
            dims.extend([
                ("padding.left", padding.left),
                ("padding.top", padding.top),
                ("padding.right", padding.right),
                ("padding.bottom", padding.bottom),
            ]);
        }
        for (name, value) in dims {
            if value % geometry_base != 0 {
                return Err(PipelineError::InvalidShape(format!(
                    "{} {} is not divisible by geometry base {}",
                    name, value, geometry_base
                )));
            }
        }
        Ok(())
    }
}

/// One-shot readiness flag of a source, set once it is attached to the muxer.
#[derive(Clone, Debug, Default)]
pub struct SourceLock {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl SourceLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let (flag, cvar) = &*self.inner;
        let mut ready = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *ready = true;
        cvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until set or until `timeout` elapses. Returns the flag state.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |ready| !*ready)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }
}

/// Per-source state.
///
/// `shape` is fixed when the source is initialised; every derived dimension is
/// a function of it.
#[derive(Clone, Debug)]
pub struct SourceInfo {
    pub source_id: String,
    pub pad_idx: Option<u32>,
    pub src_resolution: Option<Resolution>,
    shape: SourceShape,
    pub lock: SourceLock,
}

impl SourceInfo {
    pub fn new(source_id: &str, shape: SourceShape) -> Self {
        Self {
            source_id: source_id.to_string(),
            pad_idx: None,
            src_resolution: None,
            shape,
            lock: SourceLock::new(),
        }
    }

    pub fn shape(&self) -> &SourceShape {
        &self.shape
    }

    pub fn padding(&self) -> Option<&FramePadding> {
        self.shape.effective_padding()
    }

    /// Width of the frame processed by the pipeline.
    pub fn processing_width(&self) -> u32 {
        self.shape.width
    }

    pub fn processing_height(&self) -> u32 {
        self.shape.height
    }

    /// Frame width including paddings.
    pub fn total_width(&self) -> u32 {
        match &self.shape.padding {
            Some(padding) => self.processing_width() + padding.width(),
            None => self.processing_width(),
        }
    }

    pub fn total_height(&self) -> u32 {
        match &self.shape.padding {
            Some(padding) => self.processing_height() + padding.height(),
            None => self.processing_height(),
        }
    }

    /// Output frame width. Includes paddings only when they are kept.
    pub fn output_width(&self) -> u32 {
        match &self.shape.padding {
            Some(padding) if padding.keep => self.total_width(),
            _ => self.processing_width(),
        }
    }

    pub fn output_height(&self) -> u32 {
        match &self.shape.padding {
            Some(padding) if padding.keep => self.total_height(),
            _ => self.processing_height(),
        }
    }
}

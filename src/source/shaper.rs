use std::collections::HashMap;

use anyhow::{anyhow, Result};
use log::info;

use crate::frame::Frame;

use super::info::SourceShape;

/// Resolves the processing shape of a source from its first frame.
///
/// Called once per source before any transformation is applied. Returning
/// `None` keeps the source's native resolution. A returned shape must be
/// divisible by the geometry base; the pipeline rejects it otherwise.
pub trait SourceShaper: Send {
    /// Shaper identifier for logs.
    fn name(&self) -> &'static str;

    /// Divisor every returned dimension must satisfy.
    fn geometry_base(&self) -> u32;

    fn resolve(
        &self,
        source_id: &str,
        width: u32,
        height: u32,
        first_frame: &Frame,
    ) -> Result<Option<SourceShape>>;
}

/// Uses the statically configured frame parameters for every source.
#[derive(Clone, Debug)]
pub struct DefaultSourceShaper {
    geometry_base: u32,
    shape: Option<SourceShape>,
}

impl DefaultSourceShaper {
    /// Fails when the configured shape is not divisible by `geometry_base`.
    pub fn new(geometry_base: u32, shape: Option<SourceShape>) -> Result<Self> {
        if let Some(shape) = &shape {
            shape.validate(geometry_base)?;
        }
        Ok(Self {
            geometry_base,
            shape,
        })
    }
}

impl SourceShaper for DefaultSourceShaper {
    fn name(&self) -> &'static str {
        "default"
    }

    fn geometry_base(&self) -> u32 {
        self.geometry_base
    }

    fn resolve(
        &self,
        _source_id: &str,
        _width: u32,
        _height: u32,
        _first_frame: &Frame,
    ) -> Result<Option<SourceShape>> {
        Ok(self.shape)
    }
}

/// Looks the shape up in a per-source table.
#[derive(Clone, Debug)]
pub struct TableSourceShaper {
    geometry_base: u32,
    sources: HashMap<String, SourceShape>,
}

impl TableSourceShaper {
    pub fn new(geometry_base: u32, sources: HashMap<String, SourceShape>) -> Result<Self> {
        for (source_id, shape) in &sources {
            shape
                .validate(geometry_base)
                .map_err(|e| anyhow!("shape of source {}: {}", source_id, e))?;
        }
        Ok(Self {
            geometry_base,
            sources,
        })
    }
}

impl SourceShaper for TableSourceShaper {
    fn name(&self) -> &'static str {
        "table"
    }

    fn geometry_base(&self) -> u32 {
        self.geometry_base
    }

    fn resolve(
        &self,
        source_id: &str,
        width: u32,
        height: u32,
        first_frame: &Frame,
    ) -> Result<Option<SourceShape>> {
        let Some(shape) = self.sources.get(source_id) else {
            info!("no source shape for source {}", source_id);
            return Ok(None);
        };
        info!(
            "source {} with original resolution {}x{} shaped to {}x{} (codec {:?}, {} transformations)",
            source_id,
            width,
            height,
            shape.width,
            shape.height,
            first_frame.codec,
            first_frame.transformations.len()
        );
        Ok(Some(*shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_frame() -> Frame {
        Frame::new("cam-1", 0, 1920, 1080)
    }

    #[test]
    fn default_shaper_returns_configured_shape() -> Result<()> {
        let shaper = DefaultSourceShaper::new(8, Some(SourceShape::new(1280, 720)))?;
        let shape = shaper.resolve("cam-1", 1920, 1080, &first_frame())?;
        assert_eq!(shape, Some(SourceShape::new(1280, 720)));

        let native = DefaultSourceShaper::new(8, None)?;
        assert_eq!(native.resolve("cam-1", 1920, 1080, &first_frame())?, None);
        Ok(())
    }

    #[test]
    fn indivisible_width_fails_at_construction() {
        assert!(DefaultSourceShaper::new(8, Some(SourceShape::new(1284, 720))).is_err());
        let mut table = HashMap::new();
        table.insert("cam-1".to_string(), SourceShape::new(640, 482));
        assert!(TableSourceShaper::new(8, table).is_err());
    }

    #[test]
    fn table_shaper_falls_back_to_native() -> Result<()> {
        let mut table = HashMap::new();
        table.insert("cam-1".to_string(), SourceShape::new(640, 480));
        let shaper = TableSourceShaper::new(16, table)?;
        assert_eq!(
            shaper.resolve("cam-1", 1920, 1080, &first_frame())?,
            Some(SourceShape::new(640, 480))
        );
        assert_eq!(shaper.resolve("cam-9", 1920, 1080, &first_frame())?, None);
        assert_eq!(shaper.geometry_base(), 16);
        Ok(())
    }
}

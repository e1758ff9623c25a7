use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::geometry::FramePadding;
use crate::output::OutputMode;
use crate::registry::SpanSampler;
use crate::sink::DEFAULT_QUEUE_LENGTH;
use crate::source::{DefaultSourceShaper, SourceShape, SourceShaper, TableSourceShaper};

const DEFAULT_GEOMETRY_BASE: u32 = 8;
const DEFAULT_ROOT_SPAN_NAME: &str = "frame-relay";

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    frame: Option<FrameConfigFile>,
    output: Option<OutputConfigFile>,
    sink: Option<SinkConfigFile>,
    tracing: Option<TracingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    padding: Option<PaddingConfigFile>,
    geometry_base: Option<u32>,
    shaper: Option<ShaperConfigFile>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
struct PaddingConfigFile {
    keep: Option<bool>,
    left: Option<u32>,
    top: Option<u32>,
    right: Option<u32>,
    bottom: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ShaperConfigFile {
    sources: Option<HashMap<String, ShapeConfigFile>>,
}

#[derive(Debug, Deserialize)]
struct ShapeConfigFile {
    width: u32,
    height: u32,
    padding: Option<PaddingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    codec: Option<String>,
    batch_frames: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    queue_length: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TracingConfigFile {
    sampling_period: Option<u64>,
    root_span_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub frame: FrameSettings,
    pub output: OutputSettings,
    pub sink: SinkSettings,
    pub tracing: TracingSettings,
}

#[derive(Debug, Clone)]
pub struct FrameSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub padding: Option<FramePadding>,
    pub geometry_base: u32,
    /// Per-source shapes; replaces the static width/height/padding.
    pub shaper: Option<HashMap<String, SourceShape>>,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Codec name, `"copy"` for pass-through, `None` for metadata only.
    pub codec: Option<String>,
    pub batch_frames: bool,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub queue_length: usize,
}

#[derive(Debug, Clone)]
pub struct TracingSettings {
    /// Every n-th frame gets a span; 0 disables tracing.
    pub sampling_period: u64,
    pub root_span_name: String,
}

impl RelayConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAME_RELAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let frame_file = file.frame.unwrap_or_default();
        let shaper = frame_file.shaper.map(|shaper| {
            shaper
                .sources
                .unwrap_or_default()
                .into_iter()
                .map(|(source_id, shape)| {
                    let resolved = SourceShape {
                        width: shape.width,
                        height: shape.height,
                        padding: shape.padding.map(padding_from_file),
                    };
                    (source_id, resolved)
                })
                .collect()
        });
        let frame = FrameSettings {
            width: frame_file.width,
            height: frame_file.height,
            padding: frame_file.padding.map(padding_from_file),
            geometry_base: frame_file.geometry_base.unwrap_or(DEFAULT_GEOMETRY_BASE),
            shaper,
        };
        let output = OutputSettings {
            codec: file.output.as_ref().and_then(|output| output.codec.clone()),
            batch_frames: file
                .output
                .and_then(|output| output.batch_frames)
                .unwrap_or(false),
        };
        let sink = SinkSettings {
            queue_length: file
                .sink
                .and_then(|sink| sink.queue_length)
                .unwrap_or(DEFAULT_QUEUE_LENGTH),
        };
        let tracing = TracingSettings {
            sampling_period: file
                .tracing
                .as_ref()
                .and_then(|tracing| tracing.sampling_period)
                .unwrap_or(0),
            root_span_name: file
                .tracing
                .and_then(|tracing| tracing.root_span_name)
                .unwrap_or_else(|| DEFAULT_ROOT_SPAN_NAME.to_string()),
        };
        Ok(Self {
            frame,
            output,
            sink,
            tracing,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(codec) = std::env::var("FRAME_RELAY_OUTPUT_CODEC") {
            if !codec.trim().is_empty() {
                self.output.codec = Some(codec.trim().to_string());
            }
        }
        if let Ok(len) = std::env::var("FRAME_RELAY_SINK_QUEUE_LEN") {
            self.sink.queue_length = len
                .trim()
                .parse()
                .map_err(|_| anyhow!("FRAME_RELAY_SINK_QUEUE_LEN must be an integer"))?;
        }
        if let Ok(period) = std::env::var("FRAME_RELAY_TRACING_SAMPLING_PERIOD") {
            self.tracing.sampling_period = period.trim().parse().map_err(|_| {
                anyhow!("FRAME_RELAY_TRACING_SAMPLING_PERIOD must be an integer")
            })?;
        }
        if let Ok(base) = std::env::var("FRAME_RELAY_GEOMETRY_BASE") {
            self.frame.geometry_base = base
                .trim()
                .parse()
                .map_err(|_| anyhow!("FRAME_RELAY_GEOMETRY_BASE must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.frame.geometry_base == 0 {
            return Err(anyhow!("frame.geometry_base must be greater than zero"));
        }
        if self.frame.width.is_some() != self.frame.height.is_some() {
            return Err(anyhow!("frame.width and frame.height must be set together"));
        }
        if self.frame.shaper.is_some()
            && (self.frame.width.is_some() || self.frame.padding.is_some())
        {
            return Err(anyhow!(
                "frame.shaper cannot be combined with frame.width, frame.height or frame.padding"
            ));
        }
        // Builds the shaper once to run its divisibility checks.
        self.source_shaper()?;
        if let Some(codec) = self.output.codec.as_mut() {
            *codec = codec.to_lowercase();
        }
        self.output_mode()?;
        if self.sink.queue_length == 0 {
            return Err(anyhow!("sink.queue_length must be greater than zero"));
        }
        Ok(())
    }

    /// Static processing shape, if width and height are configured.
    pub fn static_shape(&self) -> Option<SourceShape> {
        match (self.frame.width, self.frame.height) {
            (Some(width), Some(height)) => Some(SourceShape {
                width,
                height,
                padding: self.frame.padding,
            }),
            _ => None,
        }
    }

    pub fn source_shaper(&self) -> Result<Box<dyn SourceShaper>> {
        let base = self.frame.geometry_base;
        match &self.frame.shaper {
            Some(sources) => Ok(Box::new(TableSourceShaper::new(base, sources.clone())?)),
            None => Ok(Box::new(DefaultSourceShaper::new(base, self.static_shape())?)),
        }
    }

    pub fn output_mode(&self) -> Result<OutputMode> {
        OutputMode::from_codec_name(self.output.codec.as_deref())
            .map_err(|e| anyhow!("output.codec: {}", e))
    }

    pub fn span_sampler(&self) -> SpanSampler {
        SpanSampler::new(self.tracing.sampling_period, &self.tracing.root_span_name)
    }
}

fn padding_from_file(file: PaddingConfigFile) -> FramePadding {
    FramePadding {
        keep: file.keep.unwrap_or(true),
        left: file.left.unwrap_or(0),
        top: file.top.unwrap_or(0),
        right: file.right.unwrap_or(0),
        bottom: file.bottom.unwrap_or(0),
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

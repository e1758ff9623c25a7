//! Codec catalogue for output frames.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Name of the pseudo-codec that relays the original encoded content.
pub const PASS_THROUGH_CODEC: &str = "copy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Codec {
    H264,
    Hevc,
    Vp8,
    Vp9,
    RawRgba,
    RawRgb24,
    Png,
    Jpeg,
}

impl Codec {
    pub const ALL: [Codec; 8] = [
        Codec::H264,
        Codec::Hevc,
        Codec::Vp8,
        Codec::Vp9,
        Codec::RawRgba,
        Codec::RawRgb24,
        Codec::Png,
        Codec::Jpeg,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Hevc => "hevc",
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp9",
            Codec::RawRgba => "raw-rgba",
            Codec::RawRgb24 => "raw-rgb24",
            Codec::Png => "png",
            Codec::Jpeg => "jpeg",
        }
    }

    pub fn caps_name(&self) -> &'static str {
        match self {
            Codec::H264 => "video/x-h264",
            Codec::Hevc => "video/x-h265",
            Codec::Vp8 => "video/x-vp8",
            Codec::Vp9 => "video/x-vp9",
            Codec::RawRgba | Codec::RawRgb24 => "video/x-raw",
            Codec::Png => "image/png",
            Codec::Jpeg => "image/jpeg",
        }
    }

    /// Parser element used in front of the decoder, if any.
    pub fn parser(&self) -> Option<&'static str> {
        match self {
            Codec::H264 => Some("h264parse"),
            Codec::Hevc => Some("h265parse"),
            Codec::Vp9 => Some("vp9parse"),
            Codec::Png => Some("pngparse"),
            Codec::Jpeg => Some("jpegparse"),
            Codec::Vp8 | Codec::RawRgba | Codec::RawRgb24 => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Codec::RawRgba | Codec::RawRgb24)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Codec::ALL
            .into_iter()
            .find(|codec| codec.name() == normalized)
            .ok_or_else(|| PipelineError::UnknownCodec(s.to_string()))
    }
}

impl TryFrom<String> for Codec {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Codec> for String {
    fn from(codec: Codec) -> Self {
        codec.name().to_string()
    }
}

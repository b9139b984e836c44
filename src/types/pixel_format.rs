//! Capture pixel format definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::RelayError;

/// Compressed (or packed) pixel formats the relay can request from a device.
///
/// The relay forwards frames unmodified, so in practice only compressed
/// formats fit in a single datagram. `Yuyv` is accepted for completeness and
/// low resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Motion JPEG, one JPEG image per buffer
    #[default]
    Mjpeg,
    /// H.264 elementary stream, one access unit per buffer
    H264,
    /// Packed YUV 4:2:2
    Yuyv,
}

impl PixelFormat {
    /// Four-character code used by V4L2 for this format.
    pub const fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::H264 => *b"H264",
            PixelFormat::Yuyv => *b"YUYV",
        }
    }

    /// Look up a format from its four-character code.
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"H264" => Some(PixelFormat::H264),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    /// Whether the device compresses frames in this format.
    pub const fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg | PixelFormat::H264)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc();
        f.write_str(std::str::from_utf8(&code).unwrap_or("????"))
    }
}

impl FromStr for PixelFormat {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mjpeg" | "mjpg" => Ok(PixelFormat::Mjpeg),
            "h264" => Ok(PixelFormat::H264),
            "yuyv" => Ok(PixelFormat::Yuyv),
            other => Err(RelayError::unsupported_format(other, "expected mjpeg, h264 or yuyv")),
        }
    }
}

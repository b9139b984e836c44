//! Relay configuration
//!
//! Everything the relay needs is a constant of the deployment: capture
//! resolution and format, device path, destination endpoint, send interval
//! and buffer pool size. Defaults match a 640x480 MJPEG webcam on
//! `/dev/video1` sending to `127.0.0.1:8888` every 10 ms. A YAML file can
//! override any subset:
//!
//! ```yaml
//! capture:
//!   device: /dev/video0
//!   width: 1280
//!   height: 720
//! transmit:
//!   destination: 192.168.1.20:8888
//!   interval_ms: 33
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::types::PixelFormat;
use crate::{RelayError, Result};

/// Largest UDP payload that fits in one IPv4 datagram
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Top-level relay configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Capture device settings
    pub capture: CaptureConfig,

    /// Transmission settings
    pub transmit: TransmitConfig,
}

/// Capture device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Device node
    pub device: PathBuf,

    /// Requested frame width
    pub width: u32,

    /// Requested frame height
    pub height: u32,

    /// Requested pixel format
    pub pixel_format: PixelFormat,

    /// Number of driver buffers to map
    pub buffer_count: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video1"),
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

/// Transmission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransmitConfig {
    /// Remote endpoint receiving the frames
    pub destination: SocketAddr,

    /// Time between send attempts
    pub interval_ms: u64,

    /// Frames larger than this are dropped instead of sent
    pub max_datagram_size: usize,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            destination: SocketAddr::from(([127, 0, 0, 1], 8888)),
            interval_ms: 10,
            max_datagram_size: MAX_UDP_PAYLOAD,
        }
    }
}

impl TransmitConfig {
    /// Send interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl RelayConfig {
    /// Load and validate a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RelayError::file_error(path, e))?;
        let config = Self::from_yaml(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: RelayConfig = if text.trim().is_empty() {
            RelayConfig::default()
        } else {
            serde_yaml_ng::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.width == 0 || capture.height == 0 {
            return Err(RelayError::config(format!(
                "capture resolution must be non-zero, got {}x{}",
                capture.width, capture.height
            )));
        }
        if capture.buffer_count == 0 {
            return Err(RelayError::config("capture.buffer_count must be at least 1"));
        }
        if capture.device.as_os_str().is_empty() {
            return Err(RelayError::config("capture.device must not be empty"));
        }

        let transmit = &self.transmit;
        if transmit.interval_ms == 0 {
            return Err(RelayError::config("transmit.interval_ms must be at least 1"));
        }
        if transmit.max_datagram_size == 0 {
            return Err(RelayError::config("transmit.max_datagram_size must be at least 1"));
        }
        if transmit.destination.port() == 0 {
            return Err(RelayError::config("transmit.destination needs a non-zero port"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        config.validate().expect("defaults validate");

        assert_eq!(config.capture.device, PathBuf::from("/dev/video1"));
        assert_eq!((config.capture.width, config.capture.height), (640, 480));
        assert_eq!(config.capture.buffer_count, 4);
        assert_eq!(config.transmit.interval(), Duration::from_millis(10));
        assert_eq!(config.transmit.destination.to_string(), "127.0.0.1:8888");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "capture:\n  width: 1280\n  height: 720\n  pixel_format: h264\n\
                    transmit:\n  interval_ms: 33\n";
        let config = RelayConfig::from_yaml(yaml).expect("valid yaml");

        assert_eq!(config.capture.width, 1280);
        assert_eq!(config.capture.pixel_format, PixelFormat::H264);
        assert_eq!(config.capture.buffer_count, 4);
        assert_eq!(config.transmit.interval_ms, 33);
        assert_eq!(config.transmit.max_datagram_size, MAX_UDP_PAYLOAD);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(RelayConfig::from_yaml("  \n").unwrap(), RelayConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RelayConfig::from_yaml("capture:\n  colour: blue\n").unwrap_err();
        assert!(matches!(err, RelayError::Parse { .. }));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for yaml in [
            "capture:\n  width: 0\n",
            "capture:\n  buffer_count: 0\n",
            "transmit:\n  interval_ms: 0\n",
            "transmit:\n  max_datagram_size: 0\n",
            "transmit:\n  destination: 127.0.0.1:0\n",
        ] {
            let err = RelayConfig::from_yaml(yaml).unwrap_err();
            assert!(matches!(err, RelayError::Config { .. }), "{yaml:?} gave {err}");
        }
    }

    #[test]
    fn missing_file_is_a_file_error() {
        let err = RelayConfig::load("/nonexistent/camrelay.yaml").unwrap_err();
        assert!(matches!(err, RelayError::File { .. }));
    }
}

//! Error types for the frame relay.
//!
//! Every error implements `std::error::Error` and carries enough context to
//! tell the operator what went wrong and where.
//!
//! ## Error Categories
//!
//! - **Device Errors**: opening, format negotiation, buffer allocation, stream
//!   start/stop, dequeue and requeue failures. These are fatal.
//! - **Transmission Errors**: datagram send failures and oversized frames.
//!   These are transient and never stop the pipeline.
//! - **Startup Errors**: configuration, file, parse and socket problems.
//!
//! ## Fatal vs. transient
//!
//! ```rust
//! use camrelay::RelayError;
//!
//! let error = RelayError::dequeue_failed(std::io::Error::other("device gone"));
//! assert!(error.is_fatal());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//!
//! let error = RelayError::oversized_frame(70_000, 65_507);
//! assert!(!error.is_fatal());
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Capture device {path} is unavailable: {reason}")]
    DeviceUnavailable {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Unsupported capture format {requested}: {details}")]
    UnsupportedFormat { requested: String, details: String },

    #[error("Allocation failed: {context}")]
    AllocationFailed {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Stream {operation} failed")]
    Stream {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to dequeue capture buffer")]
    Dequeue {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to requeue capture buffer {buffer}: {reason}")]
    Requeue {
        buffer: u32,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to send frame to {destination}")]
    Send {
        destination: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket error on {addr}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame of {size} bytes exceeds the {limit} byte datagram limit")]
    OversizedFrame { size: usize, limit: usize },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("{task} task failed: {details}")]
    TaskFailed { task: &'static str, details: String },
}

impl RelayError {
    /// Returns whether this error must bring the whole pipeline down.
    ///
    /// Device-path and startup errors are fatal; transmission-path errors
    /// are dropped and the next tick carries on.
    pub fn is_fatal(&self) -> bool {
        match self {
            RelayError::DeviceUnavailable { .. } => true,
            RelayError::UnsupportedFormat { .. } => true,
            RelayError::AllocationFailed { .. } => true,
            RelayError::Stream { .. } => true,
            RelayError::Dequeue { .. } => true,
            RelayError::Requeue { .. } => true,
            RelayError::Send { .. } => false,
            RelayError::Socket { .. } => true,
            RelayError::OversizedFrame { .. } => false,
            RelayError::Config { .. } => true,
            RelayError::File { .. } => true,
            RelayError::Parse { .. } => true,
            RelayError::UnsupportedPlatform { .. } => true,
            RelayError::TaskFailed { .. } => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RelayError::DeviceUnavailable { .. } => vec![
                "Check the device path exists (ls /dev/video*)",
                "Check the current user is in the video group",
                "Make sure no other process holds the camera",
            ],
            RelayError::UnsupportedFormat { .. } => vec![
                "List supported formats with v4l2-ctl --list-formats-ext",
                "Pick a resolution the camera advertises",
                "Use a camera with on-board MJPEG compression",
            ],
            RelayError::AllocationFailed { .. } => vec![
                "Reduce the buffer count",
                "Reduce the capture resolution",
                "Check available system memory",
            ],
            RelayError::Stream { .. } => vec![
                "Reconnect the camera",
                "Check kernel logs (dmesg) for driver resets",
            ],
            RelayError::Dequeue { .. } => vec![
                "Check the camera is still connected",
                "Check kernel logs (dmesg) for driver resets",
                "Restart the relay",
            ],
            RelayError::Requeue { .. } => {
                vec!["Restart the relay", "Check kernel logs (dmesg) for driver resets"]
            }
            RelayError::Send { .. } => vec![
                "Check the destination address is reachable",
                "Check local firewall rules for outgoing UDP",
            ],
            RelayError::Socket { .. } => vec![
                "Check the address is not already in use",
                "Check the address belongs to a local interface",
                "Use a port above 1024 when not running as root",
            ],
            RelayError::OversizedFrame { .. } => vec![
                "Lower the capture resolution",
                "Raise the camera's JPEG compression",
                "Raise max_datagram_size if the network path allows it",
            ],
            RelayError::Config { .. } => {
                vec!["Check the configuration file against the documented keys"]
            }
            RelayError::File { .. } => {
                vec!["Check the file exists and is readable", "Check file permissions"]
            }
            RelayError::Parse { .. } => vec!["Check the file is valid YAML"],
            RelayError::UnsupportedPlatform { .. } => vec![
                "Use the replay source on this platform",
                "Check documentation for platform requirements",
            ],
            RelayError::TaskFailed { .. } => {
                vec!["Check the log for a panic message", "Restart the relay"]
            }
        }
    }

    /// Helper constructor for device open failures.
    pub fn device_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RelayError::DeviceUnavailable { path: path.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for device open failures with an I/O cause.
    pub fn device_unavailable_with_source(
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        RelayError::DeviceUnavailable {
            path: path.into(),
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Helper constructor for format negotiation failures.
    pub fn unsupported_format(requested: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::UnsupportedFormat { requested: requested.into(), details: details.into() }
    }

    /// Helper constructor for allocation failures.
    pub fn allocation_failed(context: impl Into<String>) -> Self {
        RelayError::AllocationFailed { context: context.into(), source: None }
    }

    /// Helper constructor for allocation failures with source.
    pub fn allocation_failed_with_source(
        context: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        RelayError::AllocationFailed { context: context.into(), source: Some(source) }
    }

    /// Helper constructor for stream start/stop failures.
    pub fn stream_failed(operation: &'static str, source: std::io::Error) -> Self {
        RelayError::Stream { operation, source }
    }

    /// Helper constructor for dequeue failures.
    pub fn dequeue_failed(source: std::io::Error) -> Self {
        RelayError::Dequeue { source }
    }

    /// Helper constructor for requeue failures.
    pub fn requeue_failed(buffer: u32, reason: impl Into<String>) -> Self {
        RelayError::Requeue { buffer, reason: reason.into(), source: None }
    }

    /// Helper constructor for datagram send failures.
    pub fn send_failed(destination: SocketAddr, source: std::io::Error) -> Self {
        RelayError::Send { destination, source }
    }

    /// Helper constructor for sockets that cannot be opened or bound.
    pub fn socket_failed(addr: SocketAddr, source: std::io::Error) -> Self {
        RelayError::Socket { addr, source }
    }

    /// Helper constructor for frames larger than one datagram.
    pub fn oversized_frame(size: usize, limit: usize) -> Self {
        RelayError::OversizedFrame { size, limit }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        RelayError::Config { reason: reason.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RelayError::File { path: path.into(), source }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        RelayError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }

    /// Helper constructor for worker tasks that panicked or were aborted.
    pub fn task_failed(task: &'static str, details: impl Into<String>) -> Self {
        RelayError::TaskFailed { task, details: details.into() }
    }
}

impl From<serde_yaml_ng::Error> for RelayError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        RelayError::Parse { context: "YAML".to_string(), details: err.to_string() }
    }
}

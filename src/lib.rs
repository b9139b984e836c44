//! Best-effort, latest-frame-wins camera relay over UDP.
//!
//! camrelay captures compressed frames from a camera and forwards the most
//! recent one to a remote endpoint at a bounded rate. There is no
//! acknowledgement and no retransmission: freshness matters more than
//! completeness, so a slow or absent receiver just misses frames.
//!
//! # Architecture
//!
//! - **Capture loop**: blocking thread pulling buffers from a
//!   [`CaptureDevice`] and copying them into the [`FrameStore`]
//! - **Frame store**: single mutex-guarded slot holding the latest [`Frame`]
//! - **Transmission loop**: periodic task sending whatever the store holds
//!   through a [`FrameSink`]
//! - **Pipeline**: starts both loops, joins them, tears the device down
//! - **Receiving end**: [`FrameReceiver`] fills a store from the network and
//!   [`WebServer`] shows it to browsers as an MJPEG stream
//!
//! A device fault stops everything; a failed send only costs that tick.
//!
//! ## Example (replayed frames)
//!
//! ```rust,no_run
//! use camrelay::{Pipeline, ReplayDevice, TransmitSettings, UdpSink};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> camrelay::Result<()> {
//!     let device = ReplayDevice::open("frames/", 30.0, true)?;
//!     let sink = UdpSink::bind("127.0.0.1:8888".parse().unwrap()).await?;
//!     let settings = TransmitSettings {
//!         interval: Duration::from_millis(10),
//!         max_datagram_size: 65_507,
//!     };
//!
//!     let pipeline = Pipeline::new(device, sink, settings);
//!     let report = pipeline.run().await?;
//!     println!("sent {} frames", report.stats.frames_sent);
//!     Ok(())
//! }
//! ```

mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Frame pipeline
pub mod capture;
pub mod device;
pub mod pipeline;
pub mod stats;
pub mod store;
pub mod transmit;

// Sources, receiving end, viewer and configuration
pub mod config;
pub mod devices;
pub mod receiver;
pub mod web;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use config::{CaptureConfig, RelayConfig, TransmitConfig};
pub use device::{BufferHandle, CaptureDevice, CapturedBuffer, Dequeue, DeviceInfo};
pub use devices::{ReplayDevice, V4l2Device};
pub use pipeline::{Pipeline, RunReport};
pub use receiver::FrameReceiver;
pub use stats::{PipelineStats, StatsSnapshot};
pub use store::FrameStore;
pub use transmit::{FrameSink, TransmitSettings, UdpSink};
pub use web::WebServer;

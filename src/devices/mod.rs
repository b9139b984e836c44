//! Concrete capture devices
//!
//! - [`V4l2Device`]: memory-mapped V4L2 streaming capture (Linux)
//! - [`ReplayDevice`]: frames loaded from a directory, paced at a fixed rate
//!
//! Both implement [`CaptureDevice`](crate::CaptureDevice); the pipeline does
//! not care which one it drives.

pub mod replay;
pub mod v4l2;

pub use replay::ReplayDevice;
pub use v4l2::V4l2Device;

//! Capture device trait
//!
//! A capture device owns a pool of buffers the hardware fills with one
//! compressed frame each. The capture loop borrows a filled buffer through
//! [`CaptureDevice::dequeue`], copies it out, and hands it back through
//! [`CaptureDevice::requeue`]. The borrow returned by `dequeue` is tied to
//! `&mut self`, so a buffer cannot be retained once the device is used again.
//!
//! Opening, format negotiation and buffer allocation are construction-time
//! concerns of each concrete device; see [`crate::devices`].

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::Result;
use crate::types::PixelFormat;

/// Opaque token identifying a dequeued buffer to its device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A filled buffer, borrowed from the device until it is requeued
#[derive(Debug)]
pub struct CapturedBuffer<'a> {
    /// Token to pass back to [`CaptureDevice::requeue`]
    pub handle: BufferHandle,

    /// Valid byte range of the buffer
    pub bytes: &'a [u8],
}

/// Outcome of waiting for a completed buffer
#[derive(Debug)]
pub enum Dequeue<'a> {
    /// A buffer holding one frame
    Ready(CapturedBuffer<'a>),

    /// Nothing completed yet; poll again
    Idle,

    /// The source has no more frames (finite sources only)
    Exhausted,
}

/// Static description of an opened device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Device node or source directory
    pub path: PathBuf,
    /// Driver or source name
    pub driver: String,
    /// Negotiated frame width
    pub width: u32,
    /// Negotiated frame height
    pub height: u32,
    /// Negotiated pixel format
    pub pixel_format: PixelFormat,
    /// Number of buffers in the pool
    pub buffer_count: u32,
}

/// Trait for frame capture sources
///
/// All methods block the calling thread. The capture loop runs on a
/// dedicated blocking thread and is the only user of the device while the
/// stream is running.
pub trait CaptureDevice: Send + 'static {
    /// Describe the opened device
    fn info(&self) -> DeviceInfo;

    /// Start streaming into the buffer pool
    fn start_stream(&mut self) -> Result<()>;

    /// Wait for the next completed buffer
    ///
    /// Returns:
    /// - `Ok(Dequeue::Ready(buffer))` - a filled buffer, to be requeued
    /// - `Ok(Dequeue::Idle)` - no buffer ready yet
    /// - `Ok(Dequeue::Exhausted)` - no more frames will ever arrive
    /// - `Err(e)` - device fault (fatal)
    fn dequeue(&mut self) -> Result<Dequeue<'_>>;

    /// Return a buffer to the device's free queue
    fn requeue(&mut self, handle: BufferHandle) -> Result<()>;

    /// Stop streaming
    fn stop_stream(&mut self) -> Result<()>;

    /// Release the device and its buffers
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

//! V4L2 memory-mapped capture for Linux
//!
//! Built on the `v4l` crate's mmap stream. That stream folds the V4L2 queue
//! bookkeeping into its `next()` call: the first call queues every buffer and
//! issues `VIDIOC_STREAMON`, and each later call re-queues the buffer handed
//! out previously before waiting on `VIDIOC_DQBUF`. This device keeps the
//! explicit dequeue/requeue contract on top of that by refusing to dequeue
//! while a buffer is still outstanding, so the physical re-queue done by the
//! crate always follows our logical [`requeue`](CaptureDevice::requeue).

use crate::Result;

#[cfg(target_os = "linux")]
use {
    crate::RelayError,
    crate::config::CaptureConfig,
    crate::device::{BufferHandle, CaptureDevice, CapturedBuffer, Dequeue, DeviceInfo},
    crate::types::PixelFormat,
    std::path::{Path, PathBuf},
    tracing::{debug, info, trace, warn},
    v4l::buffer::Type,
    v4l::io::traits::{CaptureStream, Stream as _},
    v4l::prelude::{Device, MmapStream},
    v4l::video::Capture,
    v4l::{Format, FourCC},
};

/// Memory-mapped V4L2 capture device
#[cfg(target_os = "linux")]
pub struct V4l2Device {
    /// Device node
    path: PathBuf,

    /// Driver name reported by VIDIOC_QUERYCAP
    driver: String,

    /// Open device handle
    device: Device,

    /// Negotiated format, once configured
    format: Option<(u32, u32, PixelFormat)>,

    /// Mapped buffer pool, once allocated
    stream: Option<MmapStream<'static>>,

    /// Requested pool size
    buffer_count: u32,

    /// Buffer currently lent to the capture loop
    outstanding: Option<BufferHandle>,

    /// Whether STREAMON has been issued
    streaming: bool,
}

#[cfg(target_os = "linux")]
impl V4l2Device {
    /// Open a device node and check it can capture video.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening capture device {}", path.display());

        let device = Device::with_path(&path).map_err(|e| {
            RelayError::device_unavailable_with_source(&path, "failed to open device node", e)
        })?;

        let caps = device.query_caps().map_err(|e| {
            RelayError::device_unavailable_with_source(&path, "failed to query capabilities", e)
        })?;

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(RelayError::device_unavailable(
                &path,
                "device does not support video capture",
            ));
        }
        if !caps.capabilities.contains(v4l::capability::Flags::STREAMING) {
            return Err(RelayError::device_unavailable(
                &path,
                "device does not support streaming I/O",
            ));
        }

        debug!(driver = %caps.driver, card = %caps.card, "Device capabilities queried");

        Ok(Self {
            path,
            driver: caps.driver,
            device,
            format: None,
            stream: None,
            buffer_count: 0,
            outstanding: None,
            streaming: false,
        })
    }

    /// Negotiate resolution and pixel format.
    ///
    /// Drivers may adjust the request; a different pixel format is rejected,
    /// a different resolution is accepted with a warning.
    pub fn configure(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> Result<()> {
        let requested = Format::new(width, height, FourCC::new(&pixel_format.fourcc()));
        let negotiated = self.device.set_format(&requested).map_err(|e| {
            RelayError::unsupported_format(
                format!("{}x{} {}", width, height, pixel_format),
                format!("VIDIOC_S_FMT failed: {}", e),
            )
        })?;

        let negotiated_format = PixelFormat::from_fourcc(&negotiated.fourcc.repr)
            .filter(|f| *f == pixel_format)
            .ok_or_else(|| {
                RelayError::unsupported_format(
                    pixel_format.to_string(),
                    format!("driver negotiated {} instead", negotiated.fourcc),
                )
            })?;

        if !negotiated_format.is_compressed() {
            warn!("{} is uncompressed, frames may not fit in one datagram", negotiated_format);
        }

        if negotiated.width != width || negotiated.height != height {
            warn!(
                "Driver adjusted resolution from {}x{} to {}x{}",
                width, height, negotiated.width, negotiated.height
            );
        }

        info!(
            "Configured {}x{} {}",
            negotiated.width, negotiated.height, negotiated_format
        );
        self.format = Some((negotiated.width, negotiated.height, negotiated_format));
        Ok(())
    }

    /// Request and map `count` capture buffers.
    pub fn allocate_buffers(&mut self, count: u32) -> Result<()> {
        if self.format.is_none() {
            return Err(RelayError::allocation_failed("buffers requested before configure"));
        }

        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, count)
            .map_err(|e| {
                RelayError::allocation_failed_with_source(
                    format!("mapping {} capture buffers", count),
                    Box::new(e),
                )
            })?;

        debug!("Mapped {} capture buffers", count);
        self.stream = Some(stream);
        self.buffer_count = count;
        Ok(())
    }

    /// Open, configure and allocate in one go from configuration.
    pub fn from_config(config: &CaptureConfig) -> Result<Self> {
        let mut device = Self::open(&config.device)?;
        device.configure(config.width, config.height, config.pixel_format)?;
        device.allocate_buffers(config.buffer_count)?;
        Ok(device)
    }
}

#[cfg(target_os = "linux")]
impl CaptureDevice for V4l2Device {
    fn info(&self) -> DeviceInfo {
        let (width, height, pixel_format) = self.format.unwrap_or((0, 0, PixelFormat::default()));
        DeviceInfo {
            path: self.path.clone(),
            driver: self.driver.clone(),
            width,
            height,
            pixel_format,
            buffer_count: self.buffer_count,
        }
    }

    fn start_stream(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            RelayError::stream_failed("start", std::io::Error::other("buffers not allocated"))
        })?;

        // The first dequeue queues the whole pool and issues STREAMON. The
        // priming frame is dropped; the next dequeue returns its buffer.
        let (_, meta) = stream.next().map_err(|e| RelayError::stream_failed("start", e))?;
        debug!(sequence = meta.sequence, "Stream primed");

        self.streaming = true;
        info!("Capture stream started on {}", self.path.display());
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Dequeue<'_>> {
        if let Some(handle) = self.outstanding {
            return Err(RelayError::dequeue_failed(std::io::Error::other(format!(
                "buffer {} was not requeued",
                handle
            ))));
        }

        let stream = match self.stream.as_mut() {
            Some(stream) if self.streaming => stream,
            _ => {
                return Err(RelayError::dequeue_failed(std::io::Error::other(
                    "stream is not running",
                )));
            }
        };

        let (buffer, meta) = stream.next().map_err(RelayError::dequeue_failed)?;
        let used = (meta.bytesused as usize).min(buffer.len());
        let handle = BufferHandle(meta.sequence);

        trace!(sequence = meta.sequence, bytes = used, "Buffer dequeued");
        self.outstanding = Some(handle);

        Ok(Dequeue::Ready(CapturedBuffer { handle, bytes: &buffer[..used] }))
    }

    fn requeue(&mut self, handle: BufferHandle) -> Result<()> {
        match self.outstanding {
            Some(outstanding) if outstanding == handle => {
                self.outstanding = None;
                Ok(())
            }
            Some(outstanding) => Err(RelayError::requeue_failed(
                handle.0,
                format!("buffer {} is the one outstanding", outstanding),
            )),
            None => Err(RelayError::requeue_failed(handle.0, "no buffer is outstanding")),
        }
    }

    fn stop_stream(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.stop().map_err(|e| RelayError::stream_failed("stop", e))?;
        }
        self.streaming = false;
        info!("Capture stream stopped on {}", self.path.display());
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        // Unmaps the buffer pool before the device handle goes away.
        self.stream.take();
        debug!("Closed capture device {}", self.path.display());
        Ok(())
    }
}

// Non-Linux stub implementation
#[cfg(not(target_os = "linux"))]
pub struct V4l2Device {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl V4l2Device {
    /// V4L2 capture only exists on Linux.
    ///
    /// This always returns an error; use a replay device instead.
    pub fn from_config(_config: &crate::config::CaptureConfig) -> Result<Self> {
        Err(crate::RelayError::unsupported_platform("V4L2 capture", "Linux"))
    }
}

#[cfg(not(target_os = "linux"))]
impl crate::device::CaptureDevice for V4l2Device {
    fn info(&self) -> crate::device::DeviceInfo {
        crate::device::DeviceInfo {
            path: std::path::PathBuf::new(),
            driver: String::from("unsupported"),
            width: 0,
            height: 0,
            pixel_format: crate::types::PixelFormat::default(),
            buffer_count: 0,
        }
    }

    fn start_stream(&mut self) -> Result<()> {
        Err(crate::RelayError::unsupported_platform("V4L2 capture", "Linux"))
    }

    fn dequeue(&mut self) -> Result<crate::device::Dequeue<'_>> {
        Err(crate::RelayError::unsupported_platform("V4L2 capture", "Linux"))
    }

    fn requeue(&mut self, _handle: crate::device::BufferHandle) -> Result<()> {
        Err(crate::RelayError::unsupported_platform("V4L2 capture", "Linux"))
    }

    fn stop_stream(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

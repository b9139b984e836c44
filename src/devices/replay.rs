//! Replay device for recorded frames
//!
//! Loads every frame file from a directory (sorted by file name) and hands
//! them out at a fixed rate, as if a camera were producing them. Useful for
//! running the relay without hardware.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::device::{BufferHandle, CaptureDevice, CapturedBuffer, Dequeue, DeviceInfo};
use crate::types::PixelFormat;
use crate::{RelayError, Result};

/// File extensions treated as frames
const FRAME_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "mjpg", "h264", "bin"];

/// Capture device replaying frame files from a directory
pub struct ReplayDevice {
    /// Source directory
    dir: PathBuf,

    /// Frame payloads, in playback order
    frames: Vec<Vec<u8>>,

    /// Index of the next frame to hand out
    cursor: usize,

    /// Time between frames
    period: Duration,

    /// Deadline for the next frame
    next_due: Option<Instant>,

    /// Restart from the first frame when the last one is consumed
    looping: bool,

    /// Frame currently lent to the capture loop
    outstanding: Option<BufferHandle>,

    /// Whether the stream was started
    streaming: bool,
}

impl ReplayDevice {
    /// Load frames from `dir` and pace them at `fps`.
    pub fn open<P: AsRef<Path>>(dir: P, fps: f64, looping: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !(fps.is_finite() && fps > 0.0) {
            return Err(RelayError::config(format!("replay fps must be positive, got {}", fps)));
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| {
            RelayError::device_unavailable_with_source(&dir, "failed to read replay directory", e)
        })?;

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| {
                    FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                })
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let data = std::fs::read(path).map_err(|e| RelayError::file_error(path, e))?;
            if data.is_empty() {
                debug!("Skipping empty frame file {}", path.display());
                continue;
            }
            frames.push(data);
        }

        Self::from_frames(dir, frames, fps, looping)
    }

    /// Build a replay device from in-memory frames.
    pub fn from_frames(
        dir: impl Into<PathBuf>,
        frames: Vec<Vec<u8>>,
        fps: f64,
        looping: bool,
    ) -> Result<Self> {
        let dir = dir.into();
        if frames.is_empty() {
            return Err(RelayError::device_unavailable(&dir, "no frame files found"));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(RelayError::config(format!("replay fps must be positive, got {}", fps)));
        }

        info!("Loaded {} replay frames from {} at {}fps", frames.len(), dir.display(), fps);

        Ok(Self {
            dir,
            frames,
            cursor: 0,
            period: Duration::from_secs_f64(1.0 / fps),
            next_due: None,
            looping,
            outstanding: None,
            streaming: false,
        })
    }

    /// Number of loaded frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Sleep until the next frame is due and advance the deadline.
    fn pace(&mut self) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        // Fall behind gracefully instead of bursting to catch up
        let next = due + self.period;
        self.next_due = Some(next.max(Instant::now()));
    }
}

impl CaptureDevice for ReplayDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            path: self.dir.clone(),
            driver: String::from("replay"),
            width: 0,
            height: 0,
            pixel_format: PixelFormat::Mjpeg,
            buffer_count: 1,
        }
    }

    fn start_stream(&mut self) -> Result<()> {
        self.streaming = true;
        self.next_due = None;
        debug!("Replay stream started");
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Dequeue<'_>> {
        if !self.streaming {
            return Err(RelayError::dequeue_failed(std::io::Error::other("stream is not running")));
        }
        if let Some(handle) = self.outstanding {
            return Err(RelayError::dequeue_failed(std::io::Error::other(format!(
                "buffer {} was not requeued",
                handle
            ))));
        }

        if self.cursor >= self.frames.len() {
            if !self.looping {
                debug!("Replay exhausted after {} frames", self.frames.len());
                return Ok(Dequeue::Exhausted);
            }
            self.cursor = 0;
        }

        self.pace();

        let index = self.cursor;
        self.cursor += 1;
        let handle = BufferHandle(index as u32);
        self.outstanding = Some(handle);
        trace!(frame = index, "Replay frame dequeued");

        Ok(Dequeue::Ready(CapturedBuffer { handle, bytes: &self.frames[index] }))
    }

    fn requeue(&mut self, handle: BufferHandle) -> Result<()> {
        match self.outstanding.take() {
            Some(outstanding) if outstanding == handle => Ok(()),
            other => {
                self.outstanding = other;
                Err(RelayError::requeue_failed(handle.0, "buffer is not outstanding"))
            }
        }
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.streaming = false;
        debug!("Replay stream stopped");
        Ok(())
    }

    fn close(self) -> Result<()> {
        debug!("Closed replay source {}", self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> Vec<Vec<u8>> {
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    }

    fn next_bytes(device: &mut ReplayDevice) -> Option<Vec<u8>> {
        let (handle, bytes) = match device.dequeue().expect("dequeue succeeds") {
            Dequeue::Ready(buffer) => (buffer.handle, buffer.bytes.to_vec()),
            Dequeue::Idle | Dequeue::Exhausted => return None,
        };
        device.requeue(handle).expect("requeue succeeds");
        Some(bytes)
    }

    #[test]
    fn replays_frames_in_order_then_exhausts() {
        let mut device = ReplayDevice::from_frames("mem", frames(), 1000.0, false).unwrap();
        device.start_stream().unwrap();

        assert_eq!(next_bytes(&mut device).as_deref(), Some(&b"one"[..]));
        assert_eq!(next_bytes(&mut device).as_deref(), Some(&b"two"[..]));
        assert_eq!(next_bytes(&mut device).as_deref(), Some(&b"three"[..]));
        assert_eq!(next_bytes(&mut device), None);
    }

    #[test]
    fn looping_wraps_around() {
        let mut device = ReplayDevice::from_frames("mem", frames(), 1000.0, true).unwrap();
        device.start_stream().unwrap();

        for _ in 0..3 {
            next_bytes(&mut device);
        }
        assert_eq!(next_bytes(&mut device).as_deref(), Some(&b"one"[..]));
    }

    #[test]
    fn dequeue_without_requeue_is_an_error() {
        let mut device = ReplayDevice::from_frames("mem", frames(), 1000.0, false).unwrap();
        device.start_stream().unwrap();

        match device.dequeue().unwrap() {
            Dequeue::Ready(_) => {}
            other => panic!("expected a frame, got {:?}", other),
        }

        let err = device.dequeue().unwrap_err();
        assert!(matches!(err, RelayError::Dequeue { .. }));
    }

    #[test]
    fn requeue_of_unknown_handle_is_rejected() {
        let mut device = ReplayDevice::from_frames("mem", frames(), 1000.0, false).unwrap();
        device.start_stream().unwrap();

        let err = device.requeue(BufferHandle(9)).unwrap_err();
        assert!(matches!(err, RelayError::Requeue { buffer: 9, .. }));
    }

    #[test]
    fn dequeue_before_start_is_an_error() {
        let mut device = ReplayDevice::from_frames("mem", frames(), 1000.0, false).unwrap();
        assert!(device.dequeue().is_err());
    }

    #[test]
    fn rejects_empty_sources_and_bad_rates() {
        assert!(ReplayDevice::from_frames("mem", Vec::new(), 30.0, false).is_err());
        assert!(ReplayDevice::from_frames("mem", frames(), 0.0, false).is_err());
        assert!(ReplayDevice::from_frames("mem", frames(), f64::NAN, false).is_err());
    }

    #[test]
    fn opens_frame_files_from_directory() {
        let dir = std::env::temp_dir().join(format!("camrelay-replay-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("002.jpg"), b"second").unwrap();
        std::fs::write(dir.join("001.jpg"), b"first").unwrap();
        std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let mut device = ReplayDevice::open(&dir, 1000.0, false).unwrap();
        assert_eq!(device.frame_count(), 2);
        device.start_stream().unwrap();
        assert_eq!(next_bytes(&mut device).as_deref(), Some(&b"first"[..]));

        std::fs::remove_dir_all(&dir).ok();
    }
}

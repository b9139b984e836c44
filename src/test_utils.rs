//! Test doubles for the capture device and the network sink
//!
//! [`ScriptedDevice`] plays back a fixed script of frames, idle polls and
//! failures, and counts every contract call through a shared
//! [`DeviceCalls`] so tests can check teardown after the device has been
//! moved into the pipeline. [`RecordingSink`] keeps every payload it was
//! asked to send and can be told to fail its first few sends.

#![cfg(any(test, feature = "benchmark"))]

use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::device::{BufferHandle, CaptureDevice, CapturedBuffer, Dequeue, DeviceInfo};
use crate::transmit::FrameSink;
use crate::types::PixelFormat;
use crate::{RelayError, Result};

/// One scripted device event
#[derive(Debug, Clone)]
pub enum Step {
    /// Hand out a buffer holding these bytes
    Frame(Vec<u8>),

    /// Hand out a buffer holding these bytes, then fail its requeue
    FailRequeue(Vec<u8>),

    /// Report nothing within the poll timeout
    Idle,

    /// Block inside dequeue for this long, then continue with the next step
    Delay(Duration),

    /// Fail the dequeue call
    FailDequeue,

    /// Panic inside the dequeue call
    Panic,
}

/// Call counters shared between a [`ScriptedDevice`] and the test
#[derive(Debug, Clone, Default)]
pub struct DeviceCalls {
    starts: Arc<AtomicUsize>,
    dequeues: Arc<AtomicUsize>,
    requeues: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    fault_at: Arc<Mutex<Option<Instant>>>,
}

impl DeviceCalls {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn dequeues(&self) -> usize {
        self.dequeues.load(Ordering::SeqCst)
    }

    pub fn requeues(&self) -> usize {
        self.requeues.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// When a scripted dequeue failure was returned
    pub fn fault_at(&self) -> Option<Instant> {
        *self.fault_at.lock().expect("fault lock")
    }

    fn mark_fault(&self) {
        *self.fault_at.lock().expect("fault lock") = Some(Instant::now());
    }
}

/// Capture device driven by a script
#[derive(Debug)]
pub struct ScriptedDevice {
    script: VecDeque<Step>,
    current: Vec<u8>,
    outstanding: Option<BufferHandle>,
    fail_requeue: bool,
    next_handle: u32,
    idle_when_done: Option<Duration>,
    fail_start: bool,
    calls: DeviceCalls,
}

impl ScriptedDevice {
    /// Device that reports [`Dequeue::Exhausted`] once the script runs out
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            current: Vec::new(),
            outstanding: None,
            fail_requeue: false,
            next_handle: 0,
            idle_when_done: None,
            fail_start: false,
            calls: DeviceCalls::default(),
        }
    }

    /// Keep reporting idle polls, one per `poll`, once the script runs out
    pub fn idle_when_done(mut self, poll: Duration) -> Self {
        self.idle_when_done = Some(poll);
        self
    }

    /// Make `start_stream` fail
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Shared call counters
    pub fn calls(&self) -> DeviceCalls {
        self.calls.clone()
    }

    fn lend(&mut self, bytes: Vec<u8>, fail_requeue: bool) -> Dequeue<'_> {
        let handle = BufferHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.current = bytes;
        self.fail_requeue = fail_requeue;
        self.outstanding = Some(handle);
        Dequeue::Ready(CapturedBuffer { handle, bytes: &self.current })
    }
}

impl CaptureDevice for ScriptedDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            path: PathBuf::from("scripted"),
            driver: String::from("scripted"),
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Mjpeg,
            buffer_count: 1,
        }
    }

    fn start_stream(&mut self) -> Result<()> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(RelayError::stream_failed("start", std::io::Error::other("scripted")));
        }
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Dequeue<'_>> {
        self.calls.dequeues.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.outstanding {
            return Err(RelayError::dequeue_failed(std::io::Error::other(format!(
                "buffer {} was not requeued",
                handle
            ))));
        }

        loop {
            let Some(step) = self.script.pop_front() else {
                return match self.idle_when_done {
                    Some(poll) => {
                        std::thread::sleep(poll);
                        Ok(Dequeue::Idle)
                    }
                    None => Ok(Dequeue::Exhausted),
                };
            };

            match step {
                Step::Delay(duration) => std::thread::sleep(duration),
                Step::Idle => return Ok(Dequeue::Idle),
                Step::FailDequeue => {
                    self.calls.mark_fault();
                    return Err(RelayError::dequeue_failed(std::io::Error::other(
                        "scripted dequeue failure",
                    )));
                }
                Step::Panic => panic!("scripted panic"),
                Step::Frame(bytes) => return Ok(self.lend(bytes, false)),
                Step::FailRequeue(bytes) => return Ok(self.lend(bytes, true)),
            }
        }
    }

    fn requeue(&mut self, handle: BufferHandle) -> Result<()> {
        if self.outstanding.take() != Some(handle) {
            return Err(RelayError::requeue_failed(handle.0, "buffer is not outstanding"));
        }
        if self.fail_requeue {
            return Err(RelayError::requeue_failed(handle.0, "scripted requeue failure"));
        }
        self.calls.requeues.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that records payloads instead of sending them
#[derive(Debug, Clone)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Bytes>>>,
    attempts: Arc<AtomicUsize>,
    last_attempt: Arc<Mutex<Option<Instant>>>,
    failures_left: Arc<AtomicUsize>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    /// Sink whose first `count` sends fail
    pub fn failing_first(count: usize) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
            last_attempt: Arc::new(Mutex::new(None)),
            failures_left: Arc::new(AtomicUsize::new(count)),
        }
    }

    /// Payloads that were sent successfully, in order
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().expect("recording lock").clone()
    }

    /// Number of send calls, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// When the most recent send call started
    pub fn last_attempt(&self) -> Option<Instant> {
        *self.last_attempt.lock().expect("recording lock")
    }
}

#[async_trait::async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, payload: &[u8]) -> Result<usize> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_attempt.lock().expect("recording lock") = Some(Instant::now());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RelayError::send_failed(
                self.destination(),
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "scripted send failure"),
            ));
        }

        self.sent.lock().expect("recording lock").push(Bytes::copy_from_slice(payload));
        Ok(payload.len())
    }

    fn destination(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8888))
    }
}

//! Capture loop: device buffers into the frame store
//!
//! Runs on a dedicated blocking thread because every device call blocks.
//! Device faults are fatal: the loop cancels the shared token so the rest of
//! the pipeline winds down, and reports the error. Nothing is retried.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::RelayError;
use crate::device::{CaptureDevice, Dequeue};
use crate::stats::PipelineStats;
use crate::store::FrameStore;
use crate::types::copy_payload;

/// Why the capture loop returned
#[derive(Debug)]
pub enum CaptureExit {
    /// The shared token was cancelled from elsewhere
    Cancelled,

    /// The device has no more frames
    Exhausted,

    /// A device fault ended the loop
    Fault(RelayError),
}

impl CaptureExit {
    /// Whether the loop ended without a device fault
    pub fn is_clean(&self) -> bool {
        !matches!(self, CaptureExit::Fault(_))
    }
}

/// Spawn the capture loop on the blocking pool.
///
/// The device is handed back when the loop returns so the caller can stop
/// and close it after every worker has finished. That includes a panic
/// inside the device, which is reported as a fault.
pub fn spawn<D>(
    mut device: D,
    store: Arc<FrameStore>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) -> JoinHandle<(D, CaptureExit)>
where
    D: CaptureDevice,
{
    tokio::task::spawn_blocking(move || {
        let exit = match panic::catch_unwind(AssertUnwindSafe(|| {
            run(&mut device, &store, &stats, &cancel)
        })) {
            Ok(exit) => exit,
            Err(payload) => {
                let err = RelayError::task_failed("capture", panic_message(&*payload));
                fault(err, &cancel)
            }
        };
        (device, exit)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("panicked")
    }
}

/// Pull buffers from `device` into `store` until cancelled, exhausted or
/// faulted.
///
/// Every successfully dequeued buffer is requeued after its bytes are
/// installed, except when copying it out fails for lack of memory.
pub fn run<D>(
    device: &mut D,
    store: &FrameStore,
    stats: &PipelineStats,
    cancel: &CancellationToken,
) -> CaptureExit
where
    D: CaptureDevice + ?Sized,
{
    info!("Capture loop started");
    let mut frame_count = 0u64;

    let exit = loop {
        if cancel.is_cancelled() {
            info!("Capture loop cancelled");
            break CaptureExit::Cancelled;
        }

        let (handle, payload) = match device.dequeue() {
            Ok(Dequeue::Ready(buffer)) => {
                if buffer.bytes.is_empty() {
                    (buffer.handle, None)
                } else {
                    match copy_payload(buffer.bytes) {
                        Ok(payload) => (buffer.handle, Some(payload)),
                        Err(e) => break fault(e, cancel),
                    }
                }
            }
            Ok(Dequeue::Idle) => {
                trace!("No buffer ready");
                continue;
            }
            Ok(Dequeue::Exhausted) => {
                info!("Capture source exhausted");
                cancel.cancel();
                break CaptureExit::Exhausted;
            }
            Err(e) => break fault(e, cancel),
        };

        match payload {
            Some(payload) => {
                let size = payload.len();
                let frame = store.replace(payload);
                stats.record_capture(size);
                frame_count += 1;
                trace!("Captured frame {} ({} bytes, buffer {})", frame.sequence, size, handle);
            }
            None => {
                debug!("Buffer {} carried no data, skipping", handle);
                stats.record_empty_buffer();
            }
        }

        if let Err(e) = device.requeue(handle) {
            break fault(e, cancel);
        }
    };

    info!("Capture loop ended (captured {} frames)", frame_count);
    exit
}

fn fault(err: RelayError, cancel: &CancellationToken) -> CaptureExit {
    error!("Capture fault, shutting down: {}", err);
    cancel.cancel();
    CaptureExit::Fault(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedDevice, Step};

    fn harness() -> (Arc<FrameStore>, Arc<PipelineStats>, CancellationToken) {
        (Arc::new(FrameStore::new()), Arc::new(PipelineStats::new()), CancellationToken::new())
    }

    #[test]
    fn installs_each_frame_and_requeues_its_buffer() {
        let (store, stats, cancel) = harness();
        let mut device = ScriptedDevice::new(vec![
            Step::Frame(b"a".to_vec()),
            Step::Frame(b"bb".to_vec()),
            Step::Frame(b"ccc".to_vec()),
        ]);
        let calls = device.calls();
        device.start_stream().unwrap();

        let exit = run(&mut device, &store, &stats, &cancel);

        assert!(matches!(exit, CaptureExit::Exhausted));
        assert!(cancel.is_cancelled(), "exhaustion winds the pipeline down");
        assert_eq!(store.snapshot().unwrap().data.as_ref(), b"ccc");
        assert_eq!(calls.requeues(), 3);
        assert_eq!(stats.snapshot().frames_captured, 3);
        assert_eq!(stats.snapshot().bytes_captured, 6);
    }

    #[test]
    fn dequeue_failure_is_fatal_and_cancels() {
        let (store, stats, cancel) = harness();
        let mut device = ScriptedDevice::new(vec![
            Step::Frame(b"first".to_vec()),
            Step::FailDequeue,
            Step::Frame(b"never".to_vec()),
        ]);
        let calls = device.calls();
        device.start_stream().unwrap();

        let exit = run(&mut device, &store, &stats, &cancel);

        assert!(matches!(exit, CaptureExit::Fault(RelayError::Dequeue { .. })));
        assert!(cancel.is_cancelled());
        assert_eq!(store.snapshot().unwrap().data.as_ref(), b"first");
        assert_eq!(calls.requeues(), 1);
        assert_eq!(calls.dequeues(), 2);
    }

    #[test]
    fn requeue_failure_is_fatal_after_install() {
        let (store, stats, cancel) = harness();
        let mut device = ScriptedDevice::new(vec![
            Step::FailRequeue(b"kept".to_vec()),
            Step::Frame(b"never".to_vec()),
        ]);
        device.start_stream().unwrap();

        let exit = run(&mut device, &store, &stats, &cancel);

        assert!(matches!(exit, CaptureExit::Fault(RelayError::Requeue { .. })));
        assert_eq!(store.snapshot().unwrap().data.as_ref(), b"kept");
    }

    #[test]
    fn empty_buffers_are_requeued_but_not_installed() {
        let (store, stats, cancel) = harness();
        let mut device = ScriptedDevice::new(vec![Step::Frame(Vec::new())]);
        let calls = device.calls();
        device.start_stream().unwrap();

        run(&mut device, &store, &stats, &cancel);

        assert!(store.snapshot().is_none());
        assert_eq!(calls.requeues(), 1);
        assert_eq!(stats.snapshot().empty_buffers, 1);
    }

    #[test]
    fn idle_polls_keep_looping() {
        let (store, stats, cancel) = harness();
        let mut device =
            ScriptedDevice::new(vec![Step::Idle, Step::Idle, Step::Frame(b"late".to_vec())]);
        device.start_stream().unwrap();

        run(&mut device, &store, &stats, &cancel);

        assert_eq!(store.snapshot().unwrap().data.as_ref(), b"late");
    }

    #[test]
    fn pre_cancelled_token_stops_before_dequeue() {
        let (store, stats, cancel) = harness();
        let mut device = ScriptedDevice::new(vec![Step::Frame(b"a".to_vec())]);
        let calls = device.calls();
        device.start_stream().unwrap();
        cancel.cancel();

        let exit = run(&mut device, &store, &stats, &cancel);

        assert!(matches!(exit, CaptureExit::Cancelled));
        assert_eq!(calls.dequeues(), 0);
    }

    #[tokio::test]
    async fn spawn_hands_the_device_back() {
        let (store, stats, cancel) = harness();
        let mut device = ScriptedDevice::new(vec![Step::Frame(b"a".to_vec())]);
        device.start_stream().unwrap();

        let (device, exit) = spawn(device, store, stats, cancel).await.expect("capture task");

        assert!(exit.is_clean());
        assert_eq!(device.calls().closes(), 0);
    }

    #[tokio::test]
    async fn panicking_device_is_handed_back_as_a_fault() {
        let (store, stats, cancel) = harness();
        let mut device = ScriptedDevice::new(vec![Step::Frame(b"a".to_vec()), Step::Panic]);
        device.start_stream().unwrap();

        let (device, exit) =
            spawn(device, store, stats, cancel.clone()).await.expect("panic is caught");

        match exit {
            CaptureExit::Fault(RelayError::TaskFailed { task, details }) => {
                assert_eq!(task, "capture");
                assert!(details.contains("scripted panic"), "{details}");
            }
            other => panic!("expected a task fault, got {other:?}"),
        }
        assert!(cancel.is_cancelled());
        assert_eq!(device.calls().requeues(), 1);
    }
}

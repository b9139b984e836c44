//! Pipeline wires the capture and transmission loops together
//!
//! Owns the lifecycle: starts the device stream, dispatches both loops,
//! waits for a shutdown trigger (device fault, exhausted source, or an
//! external cancel), joins both loops, and only then stops and closes the
//! device.

use futures::Stream;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{self, CaptureExit};
use crate::device::CaptureDevice;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::store::FrameStore;
use crate::transmit::{self, FrameSink, TransmitSettings};
use crate::types::PipelineState;
use crate::{RelayError, Result};

/// Summary of a pipeline run that ended without a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Whether the capture source ran out rather than being cancelled
    pub exhausted: bool,

    /// Counters at shutdown
    pub stats: StatsSnapshot,
}

/// Capture-to-network frame pipeline
pub struct Pipeline<D, S> {
    device: D,
    sink: S,
    settings: TransmitSettings,
    store: Arc<FrameStore>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    state: watch::Sender<PipelineState>,
}

impl<D, S> Pipeline<D, S>
where
    D: CaptureDevice,
    S: FrameSink,
{
    /// Create a pipeline around an opened, configured device
    pub fn new(device: D, sink: S, settings: TransmitSettings) -> Self {
        let (state, _) = watch::channel(PipelineState::Init);
        Self {
            device,
            sink,
            settings,
            store: Arc::new(FrameStore::new()),
            stats: Arc::new(PipelineStats::new()),
            cancel: CancellationToken::new(),
            state,
        }
    }

    /// Token that stops the pipeline when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared frame store
    pub fn store(&self) -> Arc<FrameStore> {
        Arc::clone(&self.store)
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Current lifecycle state, updated as the pipeline runs
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Lifecycle states as a stream, starting with the current one
    pub fn state_updates(&self) -> impl Stream<Item = PipelineState> + 'static {
        WatchStream::new(self.state.subscribe())
    }

    /// Run until shutdown and tear the device down.
    ///
    /// Returns `Ok` for a normal shutdown (external cancel or exhausted
    /// source) and `Err` for a fatal device error.
    pub async fn run(self) -> Result<RunReport> {
        let Pipeline { mut device, sink, settings, store, stats, cancel, state } = self;

        let info = device.info();
        info!(
            "Starting pipeline: {} ({}, {}x{} {}, {} buffers)",
            info.path.display(),
            info.driver,
            info.width,
            info.height,
            info.pixel_format,
            info.buffer_count
        );

        if let Err(e) = device.start_stream() {
            error!("Failed to start capture stream: {}", e);
            if let Err(close_err) = device.close() {
                warn!("Failed to close device after start failure: {}", close_err);
            }
            set_state(&state, PipelineState::Stopped);
            return Err(e);
        }

        let mut capture_task =
            capture::spawn(device, Arc::clone(&store), Arc::clone(&stats), cancel.clone());
        let transmit_task =
            transmit::spawn(sink, Arc::clone(&store), Arc::clone(&stats), settings, cancel.clone());
        set_state(&state, PipelineState::Running);

        // Wait for whichever comes first: a shutdown request, or the capture
        // loop returning on its own (which always cancels before it returns,
        // unless it panicked).
        let early = tokio::select! {
            joined = &mut capture_task => Some(joined),
            _ = cancel.cancelled() => None,
        };
        cancel.cancel();
        set_state(&state, PipelineState::Stopping);
        info!("Pipeline stopping");

        let joined = match early {
            Some(joined) => joined,
            None => capture_task.await,
        };

        if let Err(e) = transmit_task.await {
            warn!("Transmission task did not finish cleanly: {}", e);
        }

        // Device panics are caught inside the task, so a join error means the
        // runtime dropped the task and the device with it.
        let (device, exit) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                error!("Capture task failed: {}", e);
                set_state(&state, PipelineState::Stopped);
                return Err(RelayError::task_failed("capture", e.to_string()));
            }
        };

        let teardown = teardown(device);
        set_state(&state, PipelineState::Stopped);

        let stats = stats.snapshot();
        info!(
            frames_captured = stats.frames_captured,
            frames_sent = stats.frames_sent,
            send_failures = stats.send_failures,
            oversized_frames = stats.oversized_frames,
            "Pipeline stopped"
        );

        match exit {
            CaptureExit::Fault(e) => {
                if let Err(teardown_err) = teardown {
                    warn!("Teardown after fault also failed: {}", teardown_err);
                }
                Err(e)
            }
            CaptureExit::Exhausted => teardown.map(|_| RunReport { exhausted: true, stats }),
            CaptureExit::Cancelled => teardown.map(|_| RunReport { exhausted: false, stats }),
        }
    }
}

/// Stop the stream and release the device. `close` consumes the device, so
/// this can only ever happen once per device.
fn teardown<D: CaptureDevice>(mut device: D) -> Result<()> {
    let stopped = device.stop_stream();
    if let Err(e) = &stopped {
        error!("Failed to stop capture stream: {}", e);
    }
    let closed = device.close();
    debug!("Device released");
    stopped.and(closed)
}

fn set_state(state: &watch::Sender<PipelineState>, next: PipelineState) {
    state.send_if_modified(|current| {
        if current.can_transition_to(next) {
            debug!("Pipeline state {} -> {}", current, next);
            *current = next;
            true
        } else {
            false
        }
    });
}

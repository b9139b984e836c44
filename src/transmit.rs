//! Transmission loop: frame store to the network
//!
//! Every tick samples whatever frame the store holds and sends it once,
//! unmodified, to a fixed endpoint. The loop never waits for a new frame, so
//! the same frame may go out on several ticks and frames overwritten between
//! ticks are never sent. Send failures are logged and forgotten; the next
//! tick simply tries again with whatever is current.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::TransmitConfig;
use crate::stats::PipelineStats;
use crate::store::FrameStore;
use crate::{RelayError, Result};

/// Trait for frame destinations
///
/// One call sends one frame as one message. No connection state, no
/// acknowledgement.
#[async_trait::async_trait]
pub trait FrameSink: Send + 'static {
    /// Send `payload` as a single message, returning the bytes written
    async fn send(&mut self, payload: &[u8]) -> Result<usize>;

    /// Where frames are sent
    fn destination(&self) -> SocketAddr;
}

/// Connectionless UDP sink
pub struct UdpSink {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpSink {
    /// Bind an ephemeral local socket matching the destination's address
    /// family.
    pub async fn bind(destination: SocketAddr) -> Result<Self> {
        let local = match destination {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket =
            UdpSocket::bind(local).await.map_err(|e| RelayError::socket_failed(local, e))?;

        debug!(
            "UDP sink bound to {} for {}",
            socket.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            destination
        );
        Ok(Self { socket, destination })
    }
}

#[async_trait::async_trait]
impl FrameSink for UdpSink {
    async fn send(&mut self, payload: &[u8]) -> Result<usize> {
        self.socket
            .send_to(payload, self.destination)
            .await
            .map_err(|e| RelayError::send_failed(self.destination, e))
    }

    fn destination(&self) -> SocketAddr {
        self.destination
    }
}

/// Timing and size limits for the transmission loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitSettings {
    /// Time between send attempts
    pub interval: Duration,

    /// Largest payload sent as one message
    pub max_datagram_size: usize,
}

impl From<&TransmitConfig> for TransmitSettings {
    fn from(config: &TransmitConfig) -> Self {
        Self { interval: config.interval(), max_datagram_size: config.max_datagram_size }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Store was empty, nothing sent
    Idle,

    /// Frame with this sequence number was sent
    Sent(u64),

    /// Frame was larger than the datagram limit and dropped
    Oversized(u64),

    /// Send failed; the frame is abandoned
    Failed(u64),
}

/// Sample the store once and send what it holds.
pub async fn tick<S>(
    sink: &mut S,
    store: &FrameStore,
    stats: &PipelineStats,
    max_datagram_size: usize,
) -> TickOutcome
where
    S: FrameSink + ?Sized,
{
    stats.record_tick();

    let Some(frame) = store.snapshot() else {
        stats.record_idle_tick();
        return TickOutcome::Idle;
    };

    if frame.len() > max_datagram_size {
        let err = RelayError::oversized_frame(frame.len(), max_datagram_size);
        warn!("Dropping frame {}: {}", frame.sequence, err);
        stats.record_oversized();
        return TickOutcome::Oversized(frame.sequence);
    }

    match sink.send(&frame.data).await {
        Ok(written) => {
            trace!("Sent frame {} ({} bytes)", frame.sequence, written);
            stats.record_send(written);
            TickOutcome::Sent(frame.sequence)
        }
        Err(e) => {
            warn!("Failed to send frame {}: {}", frame.sequence, e);
            stats.record_send_failure();
            TickOutcome::Failed(frame.sequence)
        }
    }
}

/// Spawn the transmission loop as a periodic task.
pub fn spawn<S>(
    sink: S,
    store: Arc<FrameStore>,
    stats: Arc<PipelineStats>,
    settings: TransmitSettings,
    cancel: CancellationToken,
) -> JoinHandle<S>
where
    S: FrameSink,
{
    tokio::spawn(async move { run(sink, store, stats, settings, cancel).await })
}

/// Tick until cancelled, then hand the sink back.
///
/// The first tick happens one interval after start. Cancellation wakes the
/// loop immediately instead of waiting out the current interval.
pub async fn run<S>(
    mut sink: S,
    store: Arc<FrameStore>,
    stats: Arc<PipelineStats>,
    settings: TransmitSettings,
    cancel: CancellationToken,
) -> S
where
    S: FrameSink,
{
    info!(
        "Transmission loop started ({:?} interval, destination {})",
        settings.interval,
        sink.destination()
    );

    let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Transmission loop cancelled");
                break;
            }
            _ = ticker.tick() => {}
        }

        if let TickOutcome::Sent(_) =
            tick(&mut sink, &store, &stats, settings.max_datagram_size).await
        {
            sent += 1;
        }
    }

    info!("Transmission loop ended (sent {} frames)", sent);
    sink
}

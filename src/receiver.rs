//! Receiving end of the relay
//!
//! Binds a UDP socket and installs every datagram it receives into a
//! [`FrameStore`], latest wins, exactly like the sending side does with
//! captured frames. Receive errors are transient: logged and skipped.
//!
//! [`mirror_to_file`] keeps a file on disk in step with the store. The file
//! is replaced by rename, so readers see either the old frame or the new
//! one, never a partial write.

use bytes::Bytes;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::store::FrameStore;
use crate::{RelayError, Result};

/// Largest datagram the receiver accepts
pub const MAX_DATAGRAM: usize = 65_535;

/// UDP frame receiver
pub struct FrameReceiver {
    socket: UdpSocket,
    addr: SocketAddr,
}

impl FrameReceiver {
    /// Bind to `addr` (use port 0 for an ephemeral port)
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| RelayError::socket_failed(addr, e))?;
        debug!("Receiver bound to {}", addr);
        Ok(Self { socket, addr })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|e| RelayError::socket_failed(self.addr, e))
    }

    /// Receive into `store` until cancelled. Returns the number of frames
    /// installed.
    pub async fn run(self, store: Arc<FrameStore>, cancel: CancellationToken) -> u64 {
        info!(
            "Receiving frames on {}",
            self.socket.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut received = 0u64;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => result,
            };

            match result {
                Ok((0, from)) => {
                    trace!("Ignoring empty datagram from {}", from);
                }
                Ok((len, from)) => {
                    let frame = store.replace(Bytes::copy_from_slice(&buf[..len]));
                    received += 1;
                    trace!("Frame {} from {} ({} bytes)", frame.sequence, from, len);
                }
                Err(e) => {
                    warn!("Receive failed: {}", e);
                }
            }
        }

        info!("Receiver stopped ({} frames)", received);
        received
    }
}

/// Replace `path` with `data` in one step.
///
/// The bytes go to a sibling `.tmp` file first, which is then renamed over
/// `path`.
pub async fn write_frame_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, data).await.map_err(|e| RelayError::file_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| RelayError::file_error(path, e))
}

/// Write the newest frame in `store` to `path` whenever its sequence moves,
/// checking every `poll`, until cancelled. Returns the number of writes.
pub async fn mirror_to_file(
    store: Arc<FrameStore>,
    path: PathBuf,
    poll: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut ticker = tokio::time::interval(poll);
    let mut written_sequence = 0u64;
    let mut writes = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(frame) = store.snapshot() else { continue };
        if frame.sequence == written_sequence {
            continue;
        }
        match write_frame_file(&path, &frame.data).await {
            Ok(()) => {
                written_sequence = frame.sequence;
                writes += 1;
            }
            Err(e) => warn!("Failed to write frame {}: {}", frame.sequence, e),
        }
    }

    debug!("Stopped mirroring to {} ({} writes)", path.display(), writes);
    writes
}

//! Pipeline counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the capture and transmission loops
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    bytes_captured: AtomicU64,
    empty_buffers: AtomicU64,
    ticks: AtomicU64,
    idle_ticks: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    oversized_frames: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Non-empty buffers copied into the store
    pub frames_captured: u64,
    /// Payload bytes copied into the store
    pub bytes_captured: u64,
    /// Buffers the driver handed back with no payload
    pub empty_buffers: u64,
    /// Transmission ticks elapsed
    pub ticks: u64,
    /// Ticks that found the store empty
    pub idle_ticks: u64,
    /// Datagrams handed to the socket
    pub frames_sent: u64,
    /// Payload bytes handed to the socket
    pub bytes_sent: u64,
    /// Sends the socket rejected
    pub send_failures: u64,
    /// Frames skipped for exceeding the datagram limit
    pub oversized_frames: u64,
}

impl PipelineStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_capture(&self, bytes: usize) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.bytes_captured.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_empty_buffer(&self) {
        self.empty_buffers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_idle_tick(&self) {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_oversized(&self) {
        self.oversized_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            empty_buffers: self.empty_buffers.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = PipelineStats::new();
        stats.record_capture(100);
        stats.record_capture(50);
        stats.record_tick();
        stats.record_idle_tick();
        stats.record_send(100);
        stats.record_send_failure();
        stats.record_oversized();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_captured, 2);
        assert_eq!(snapshot.bytes_captured, 150);
        assert_eq!(snapshot.ticks, 1);
        assert_eq!(snapshot.idle_ticks, 1);
        assert_eq!(snapshot.frames_sent, 1);
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.oversized_frames, 1);
        assert_eq!(snapshot.empty_buffers, 0);
    }
}

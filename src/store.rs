//! Single-slot, latest-wins frame store
//!
//! The store is the only state shared between the capture loop and the
//! transmission loop. One mutex guards one slot; `replace` swaps a complete
//! [`Frame`] in and `snapshot` clones a complete one out, so a half-written
//! frame is never observable. Both operations only move reference-counted
//! handles while the guard is held. Copying out of device memory happens
//! before `replace` is called and the network send happens after `snapshot`
//! returns.

use bytes::Bytes;
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

use crate::types::Frame;

#[derive(Debug, Default)]
struct Slot {
    current: Option<Frame>,
    installed: u64,
}

/// Mutex-guarded holder of the most recent [`Frame`]
#[derive(Debug, Default)]
pub struct FrameStore {
    slot: Mutex<Slot>,
}

impl FrameStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the current frame (if any) and install `data` in its place.
    ///
    /// Returns a handle to the frame that was installed.
    pub fn replace(&self, data: Bytes) -> Frame {
        let mut slot = self.lock();
        slot.installed += 1;
        let frame = Frame::new(data, slot.installed);
        slot.current = Some(frame.clone());
        drop(slot);

        trace!(sequence = frame.sequence, size = frame.len(), "Frame installed");
        frame
    }

    /// Return the current frame, or `None` if nothing was ever installed.
    pub fn snapshot(&self) -> Option<Frame> {
        self.lock().current.clone()
    }

    /// Empty the slot. The install counter keeps counting.
    pub fn clear(&self) {
        self.lock().current = None;
    }

    /// Whether the slot is empty
    pub fn is_empty(&self) -> bool {
        self.lock().current.is_none()
    }

    /// Sequence number of the last installed frame (0 if none)
    pub fn latest_sequence(&self) -> u64 {
        self.lock().installed
    }

    // Every critical section leaves the slot holding either the old or the
    // new complete frame, so a poisoned guard is still consistent.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    /// Payload whose every byte equals `tag`, so a torn read would show
    /// bytes from two different tags.
    fn tagged(tag: u8, len: usize) -> Bytes {
        Bytes::from(vec![tag; len])
    }

    fn is_uniform(frame: &Frame) -> bool {
        frame.data.first().is_none_or(|first| frame.data.iter().all(|b| b == first))
    }

    #[test]
    fn snapshot_before_replace_is_empty() {
        let store = FrameStore::new();
        assert!(store.snapshot().is_none());
        assert!(store.is_empty());
        assert_eq!(store.latest_sequence(), 0);
    }

    #[test]
    fn replace_then_snapshot_returns_exactly_that_frame() {
        let store = FrameStore::new();
        let installed = store.replace(Bytes::from_static(b"frame-a"));

        let snapshot = store.snapshot().expect("frame installed");
        assert_eq!(snapshot, installed);
        assert_eq!(snapshot.data.as_ref(), b"frame-a");
        assert_eq!(snapshot.sequence, 1);
    }

    #[test]
    fn snapshot_is_idempotent_without_replace() {
        let store = FrameStore::new();
        store.replace(Bytes::from_static(b"frame-a"));

        assert_eq!(store.snapshot(), store.snapshot());
    }

    #[test]
    fn replace_supersedes_previous_frame() {
        let store = FrameStore::new();
        store.replace(Bytes::from_static(b"a"));
        store.replace(Bytes::from_static(b"b"));
        let latest = store.replace(Bytes::from_static(b"c"));

        assert_eq!(store.snapshot(), Some(latest));
        assert_eq!(store.latest_sequence(), 3);
    }

    #[test]
    fn old_snapshot_survives_replace() {
        let store = FrameStore::new();
        store.replace(Bytes::from_static(b"old"));
        let held = store.snapshot().expect("frame installed");

        store.replace(Bytes::from_static(b"new"));

        assert_eq!(held.data.as_ref(), b"old");
        assert_eq!(store.snapshot().map(|f| f.data), Some(Bytes::from_static(b"new")));
    }

    #[test]
    fn clear_empties_slot_but_keeps_counting() {
        let store = FrameStore::new();
        store.replace(Bytes::from_static(b"a"));
        store.clear();
        assert!(store.snapshot().is_none());

        let next = store.replace(Bytes::from_static(b"b"));
        assert_eq!(next.sequence, 2);
    }

    #[test]
    fn concurrent_observer_never_sees_torn_frames() {
        let store = Arc::new(FrameStore::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    let tag = (i % 251) as u8;
                    store.replace(tagged(tag, 1024 + (i as usize % 7) * 512));
                }
                done.store(true, Ordering::Release);
            })
        };

        let reader = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observed = 0u32;
                let mut last_sequence = 0;
                while !done.load(Ordering::Acquire) {
                    if let Some(frame) = store.snapshot() {
                        assert!(is_uniform(&frame), "torn frame at sequence {}", frame.sequence);
                        assert!(frame.sequence >= last_sequence, "sequence went backwards");
                        last_sequence = frame.sequence;
                        observed += 1;
                    }
                }
                observed
            })
        };

        writer.join().expect("writer thread panicked");
        reader.join().expect("reader thread panicked");
        assert_eq!(store.latest_sequence(), 2_000);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn snapshots_always_match_some_replaced_payload(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..32)
          ) {
            let store = Arc::new(FrameStore::new());
            let expected: Vec<Bytes> = payloads.into_iter().map(Bytes::from).collect();

            let writer = {
              let store = Arc::clone(&store);
              let expected = expected.clone();
              thread::spawn(move || {
                for payload in expected {
                  store.replace(payload);
                }
              })
            };

            let mut seen = Vec::new();
            for _ in 0..64 {
              if let Some(frame) = store.snapshot() {
                seen.push(frame);
              }
            }
            writer.join().expect("writer thread panicked");

            for frame in seen {
              let index = (frame.sequence - 1) as usize;
              prop_assert_eq!(&frame.data, &expected[index]);
            }

            let last = store.snapshot().expect("at least one payload");
            prop_assert_eq!(&last.data, expected.last().expect("non-empty"));
          }
        }
    }
}

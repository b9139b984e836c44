//! Frame types for the capture-to-transmit pipeline

use bytes::Bytes;

use crate::{RelayError, Result};

/// One complete compressed video frame
///
/// This is the unit that flows from the capture loop through the
/// [`FrameStore`](crate::FrameStore) to the transmission loop. The payload is
/// reference counted, so cloning a frame never copies image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Compressed image bytes, exactly as produced by the device
    pub data: Bytes,

    /// Store-assigned install counter, starting at 1
    pub sequence: u64,
}

impl Frame {
    /// Create a new frame
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self { data, sequence }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Copy borrowed device memory into an owned payload.
///
/// Reservation goes through `try_reserve_exact` so that running out of memory
/// surfaces as [`RelayError::AllocationFailed`] instead of aborting the
/// process.
pub fn copy_payload(bytes: &[u8]) -> Result<Bytes> {
    let mut owned = Vec::new();
    owned.try_reserve_exact(bytes.len()).map_err(|e| {
        RelayError::allocation_failed_with_source(
            format!("copying a {} byte frame", bytes.len()),
            Box::new(e),
        )
    })?;
    owned.extend_from_slice(bytes);
    Ok(Bytes::from(owned))
}

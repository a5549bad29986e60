//! Captured frames and the single-slot mailbox that publishes them.
//!
//! - `Frame`: RGB24 pixel buffer plus dimensions and a capture sequence number.
//! - `FrameSlot`: holds only the freshest frame. Writers replace it, readers
//!   copy it out. There is no queue, so a slow reader skips frames and a fast
//!   reader may see the same frame twice.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// One captured image. Immutable once published.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture order, starting at 1 for the first frame of a source.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Latest-value mailbox shared between the acquisition thread and readers.
///
/// The lock is held only for the swap or the clone, never across detection
/// or I/O.
#[derive(Clone, Debug, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) {
        // A panicking reader cannot leave a half-written frame behind, so a
        // poisoned lock still holds a consistent value.
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(frame);
    }

    /// Owned copy of the current frame, or `None` before the first capture.
    pub fn snapshot(&self) -> Option<Frame> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Sequence number of the current frame without copying pixels.
    pub fn latest_sequence(&self) -> Option<u64> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|frame| frame.sequence)
    }
}

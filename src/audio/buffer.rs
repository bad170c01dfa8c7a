//! Fixed-capacity circular (ring) buffer.
//!
//! When the buffer is full, new items **overwrite** the oldest data so that
//! the most-recent `capacity` items are always available.  The meter relies
//! on this in two places: the cpal source accumulates raw samples here
//! between blocking reads, and the reporter channel queues loudness samples
//! here so a slow display never stalls capture ("latest value wins").
//!
//! # Example
//!
//! ```rust
//! use sound_meter::audio::RingBuffer;
//!
//! let mut buf = RingBuffer::new(4);
//! for sample in [1_i16, 2, 3, 4] {
//!     assert_eq!(buf.push(sample), None);
//! }
//! assert_eq!(buf.push(5), Some(1)); // full → oldest dropped
//! assert_eq!(buf.pop_front(), Some(2));
//!
//! let mut out = [0_i16; 8];
//! assert_eq!(buf.read_into(&mut out), 3);
//! assert_eq!(&out[..3], &[3, 4, 5]);
//! ```

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity circular buffer.
///
/// Generic over `T: Copy + Default`; the crate stores `i16` PCM samples and
/// [`LoudnessSample`](crate::audio::LoudnessSample) values in it.
///
/// ## Overflow behaviour
///
/// When a push would exceed `capacity`, the oldest items are silently
/// overwritten.  The buffer never allocates beyond its initial capacity.
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Index of the oldest valid item.
    read_pos: usize,
    /// Number of valid items currently stored (≤ `capacity`).
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a new ring buffer with the given `capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![T::default(); capacity],
            capacity,
            read_pos: 0,
            len: 0,
        }
    }

    /// Append one item, returning the item it evicted when the buffer was
    /// already full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let write_pos = (self.read_pos + self.len) % self.capacity;
        if self.len == self.capacity {
            let evicted = self.buf[write_pos];
            self.buf[write_pos] = item;
            self.read_pos = (self.read_pos + 1) % self.capacity;
            Some(evicted)
        } else {
            self.buf[write_pos] = item;
            self.len += 1;
            None
        }
    }

    /// Remove and return the oldest item.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.buf[self.read_pos];
        self.read_pos = (self.read_pos + 1) % self.capacity;
        self.len -= 1;
        Some(item)
    }

    /// Move up to `out.len()` of the oldest items into `out`, in
    /// chronological order.  Returns the number of items written.
    pub fn read_into(&mut self, out: &mut [T]) -> usize {
        let count = out.len().min(self.len);
        for slot in out.iter_mut().take(count) {
            *slot = self.buf[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.capacity;
        }
        self.len -= count;
        count
    }

    /// Number of valid items currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the buffer contains no items.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of items the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

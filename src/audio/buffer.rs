//! Lock-free single-producer / single-consumer ring buffer for mono `f32`
//! audio frames.
//!
//! [`RingBuffer::new`] allocates the storage once; [`RingBuffer::split`]
//! turns it into exactly one [`RingProducer`] (handed to the real-time audio
//! callback) and exactly one [`RingConsumer`] (kept by the reader thread).
//! Both halves wrap a [`ringbuf::HeapRb`]; neither locks, blocks or
//! allocates after construction. The halves also share a dropped-frame
//! counter.
//!
//! ## Overrun behaviour
//!
//! When the buffer is full, incoming frames are **dropped** and counted.
//! Unread data is never overwritten, so the consumer always sees an
//! unbroken prefix of the stream.
//!
//! # Example
//!
//! ```rust
//! use mel_capture::audio::RingBuffer;
//!
//! let (mut tx, mut rx) = RingBuffer::new(4).unwrap().split();
//! assert_eq!(tx.push(&[1.0, 2.0, 3.0, 4.0, 5.0]), 4); // 5.0 is dropped
//!
//! let mut out = [0.0_f32; 4];
//! assert!(rx.pop_exact(&mut out));
//! assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
//! assert_eq!(rx.dropped_frames(), 1);
//! ```

use std::collections::TryReserveError;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use thiserror::Error;

// ---------------------------------------------------------------------------
// RingBufferError
// ---------------------------------------------------------------------------

/// Reasons the ring buffer storage could not be created.
#[derive(Debug, Error)]
pub enum RingBufferError {
    #[error("ring buffer capacity must be > 0")]
    ZeroCapacity,

    #[error("ring buffer capacity {0} frames is too large")]
    TooLarge(usize),

    #[error("failed to allocate ring buffer storage: {0}")]
    Alloc(#[from] TryReserveError),
}

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// Fixed-capacity ring buffer, not yet split into its two halves.
pub struct RingBuffer {
    inner: HeapRb<f32>,
}

impl RingBuffer {
    /// Allocate a ring buffer holding up to `capacity` frames.
    ///
    /// # Errors
    ///
    /// [`RingBufferError::ZeroCapacity`] for `capacity == 0`,
    /// [`RingBufferError::TooLarge`] when the index range would overflow,
    /// and [`RingBufferError::Alloc`] when the allocator refuses the request.
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }
        if capacity > usize::MAX / 4 {
            return Err(RingBufferError::TooLarge(capacity));
        }

        Ok(Self {
            inner: HeapRb::<f32>::try_new(capacity)?,
        })
    }

    /// Maximum number of frames the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Split into the writer and reader halves.
    ///
    /// Consuming `self` guarantees there is never a second writer or a second
    /// reader.
    pub fn split(self) -> (RingProducer, RingConsumer) {
        let dropped = Arc::new(AtomicU64::new(0));
        let (prod, cons) = self.inner.split();
        (
            RingProducer {
                inner: prod,
                dropped: Arc::clone(&dropped),
                acquired: 0,
            },
            RingConsumer {
                inner: cons,
                dropped,
                acquired: 0,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// RingProducer
// ---------------------------------------------------------------------------

/// Writer half. Safe to call from a real-time thread.
pub struct RingProducer {
    inner: HeapProd<f32>,
    dropped: Arc<AtomicU64>,
    /// Length of the region handed out by the last `acquire_write`.
    acquired: usize,
}

impl RingProducer {
    /// Borrow the next contiguous writable region, at most
    /// `requested_frames` long, zero-filled.
    ///
    /// The region may be shorter than requested when the free space wraps
    /// around the end of the storage; call again after
    /// [`commit_write`](Self::commit_write) for the second segment. An empty
    /// slice means the buffer is full. Never blocks.
    pub fn acquire_write(&mut self, requested_frames: usize) -> &mut [f32] {
        let (first, _) = self.inner.vacant_slices_mut();
        let frames = first.len().min(requested_frames);
        self.acquired = frames;

        let region = &mut first[..frames];
        for slot in region.iter_mut() {
            slot.write(0.0);
        }
        // SAFETY: every slot of `region` was initialised just above, and
        // `MaybeUninit<f32>` has the same layout as `f32`.
        unsafe { &mut *(region as *mut [MaybeUninit<f32>] as *mut [f32]) }
    }

    /// Publish `frames` frames of the last acquired region to the reader.
    ///
    /// `frames` is clamped to the length of that region.
    pub fn commit_write(&mut self, frames: usize) {
        debug_assert!(frames <= self.acquired, "commit exceeds acquired region");
        let frames = frames.min(self.acquired);
        self.acquired = 0;
        if frames > 0 {
            // SAFETY: `acquire_write` initialised at least `frames` slots
            // starting at the write index.
            unsafe { self.inner.advance_write_index(frames) };
        }
    }

    /// Copy as much of `frames` as fits and drop the rest.
    ///
    /// Returns the number of frames written; the remainder is added to the
    /// dropped-frame counter.
    pub fn push(&mut self, frames: &[f32]) -> usize {
        let written = self.inner.push_slice(frames);
        self.record_dropped(frames.len() - written);
        written
    }

    /// Average each interleaved frame of `channels` samples into one mono
    /// frame, writing straight into the ring.
    ///
    /// A trailing partial frame is ignored. Returns the number of mono frames
    /// written; frames that do not fit are dropped and counted.
    pub fn push_downmixed(&mut self, interleaved: &[f32], channels: usize) -> usize {
        if channels <= 1 {
            return self.push(interleaved);
        }

        let scale = 1.0 / channels as f32;
        let frames = interleaved.chunks_exact(channels);
        let total = frames.len();
        let written = self
            .inner
            .push_iter(frames.map(|frame| frame.iter().sum::<f32>() * scale));
        self.record_dropped(total - written);
        written
    }

    /// Frames that can currently be written without dropping.
    pub fn available_write(&self) -> usize {
        self.inner.vacant_len()
    }

    /// Maximum number of frames the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Total frames dropped because the buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline]
    fn record_dropped(&self, frames: usize) {
        if frames > 0 {
            self.dropped.fetch_add(frames as u64, Ordering::Relaxed);
        }
    }
}

// ---------------------------------------------------------------------------
// RingConsumer
// ---------------------------------------------------------------------------

/// Reader half.
pub struct RingConsumer {
    inner: HeapCons<f32>,
    dropped: Arc<AtomicU64>,
    acquired: usize,
}

impl RingConsumer {
    /// Borrow the next contiguous readable region, at most
    /// `requested_frames` long. Empty when nothing has been committed.
    pub fn acquire_read(&mut self, requested_frames: usize) -> &[f32] {
        let (first, _) = self.inner.as_slices();
        let frames = first.len().min(requested_frames);
        self.acquired = frames;
        &first[..frames]
    }

    /// Release `frames` frames of the last acquired region back to the
    /// writer. Clamped to the length of that region.
    pub fn commit_read(&mut self, frames: usize) {
        debug_assert!(frames <= self.acquired, "commit exceeds acquired region");
        let frames = frames.min(self.acquired);
        self.acquired = 0;
        self.inner.skip(frames);
    }

    /// Fill `out` completely or not at all.
    ///
    /// Availability is checked before anything is copied, so a short read
    /// returns `false` without consuming a single frame.
    pub fn pop_exact(&mut self, out: &mut [f32]) -> bool {
        if out.is_empty() || self.inner.occupied_len() < out.len() {
            return false;
        }
        let popped = self.inner.pop_slice(out);
        debug_assert_eq!(popped, out.len());
        true
    }

    /// Frames committed by the writer and not yet read.
    pub fn available_read(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Maximum number of frames the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Total frames the writer dropped because the buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

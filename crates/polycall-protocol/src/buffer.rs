//! The single-producer/single-consumer circular byte buffer.
//!
//! A single internal mutex serializes all mutations; the buffer is safe
//! for one producer and one consumer concurrently. There is no failure
//! mode here: `write` returns a short count when full, `read` returns `0`
//! when empty.

use std::sync::Mutex;

struct Inner {
    data: Vec<u8>,
    capacity: usize,
    read_cursor: usize,
    write_cursor: usize,
    used: usize,
    threshold: Option<usize>,
    /// Edge-triggered: true once `used` has crossed `threshold` from below
    /// and hasn't dropped back under it since.
    threshold_armed: bool,
}

impl Inner {
    fn crossed_threshold(&mut self) -> bool {
        let Some(threshold) = self.threshold else {
            return false;
        };
        if self.used >= threshold {
            if self.threshold_armed {
                self.threshold_armed = false;
                return true;
            }
        } else {
            self.threshold_armed = true;
        }
        false
    }
}

/// A fixed-capacity ring buffer of bytes.
pub struct CircularBuffer {
    inner: Mutex<Inner>,
}

impl CircularBuffer {
    pub fn new(capacity: usize) -> Self {
        CircularBuffer {
            inner: Mutex::new(Inner {
                data: vec![0u8; capacity.max(1)],
                capacity,
                read_cursor: 0,
                write_cursor: 0,
                used: 0,
                threshold: None,
                threshold_armed: true,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).capacity
    }

    pub fn used(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).used
    }

    pub fn available(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.capacity - inner.used
    }

    /// Set the edge-triggered notification threshold. `set_threshold(0)`
    /// disables it.
    pub fn set_threshold(&self, n: usize) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.threshold = if n == 0 { None } else { Some(n) };
        inner.threshold_armed = true;
    }

    /// Write as many bytes as fit; returns the count actually written.
    /// Returns whether the threshold was crossed upward by this write.
    pub fn write(&self, bytes: &[u8]) -> (usize, bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let capacity = inner.capacity;
        let free = capacity - inner.used;
        let to_write = bytes.len().min(free);
        for &byte in &bytes[..to_write] {
            let cursor = inner.write_cursor;
            inner.data[cursor] = byte;
            inner.write_cursor = (cursor + 1) % capacity;
        }
        inner.used += to_write;
        let crossed = inner.crossed_threshold();
        (to_write, crossed)
    }

    /// Read up to `max` bytes into `out`; returns the count actually read.
    pub fn read(&self, out: &mut [u8], max: usize) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let capacity = inner.capacity;
        let to_read = max.min(out.len()).min(inner.used);
        for slot in out.iter_mut().take(to_read) {
            let cursor = inner.read_cursor;
            *slot = inner.data[cursor];
            inner.read_cursor = (cursor + 1) % capacity;
        }
        inner.used -= to_read;
        inner.crossed_threshold();
        to_read
    }

    /// Reset both cursors and `used` to zero atomically.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.read_cursor = 0;
        inner.write_cursor = 0;
        inner.used = 0;
        inner.threshold_armed = true;
    }
}

// src/core/ring.rs

//! A fixed-capacity ring of `f64` samples with windowed statistics.
//!
//! This backs both the per-attribute moving windows of fault detection and
//! the alert-rate normalisation window of the subgraph builder.

/// A circular buffer of `f64` values. Once `max_size` values have been
/// pushed, every further push overwrites the oldest stored sample.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    buffer: Vec<f64>,
    max_size: usize,
    /// Index of the most recently pushed sample. Only meaningful while the
    /// buffer is non-empty.
    latest: usize,
}

impl CircularBuffer {
    /// Creates a buffer holding at most `max_size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `max_size < 2`; a window of fewer than two samples cannot
    /// carry a meaningful deviation.
    pub fn new(max_size: usize) -> Self {
        assert!(max_size >= 2, "circular buffer capacity must be at least 2");
        Self {
            buffer: Vec::with_capacity(max_size),
            max_size,
            latest: 0,
        }
    }

    /// Appends a sample, overwriting the oldest one once the buffer is full.
    pub fn push(&mut self, value: f64) {
        if self.buffer.len() < self.max_size {
            self.buffer.push(value);
            self.latest = self.buffer.len() - 1;
        } else {
            self.latest = (self.latest + 1) % self.max_size;
            self.buffer[self.latest] = value;
        }
    }

    /// The most recently pushed sample.
    ///
    /// # Panics
    ///
    /// Panics on an empty buffer.
    pub fn current(&self) -> f64 {
        assert!(!self.buffer.is_empty(), "no samples stored");
        self.buffer[self.latest]
    }

    /// Arithmetic mean over all stored samples (not the unused capacity).
    ///
    /// # Panics
    ///
    /// Panics on an empty buffer.
    pub fn mean(&self) -> f64 {
        assert!(!self.buffer.is_empty(), "no samples stored");
        self.buffer.iter().sum::<f64>() / self.buffer.len() as f64
    }

    /// Population standard deviation `sqrt(sum((x - mean)^2) / n)` over all
    /// stored samples, for a `mean` previously obtained from [`Self::mean`].
    ///
    /// # Panics
    ///
    /// Panics on an empty buffer.
    pub fn std_dev(&self, mean: f64) -> f64 {
        assert!(!self.buffer.is_empty(), "no samples stored");
        let sum_sq: f64 = self.buffer.iter().map(|v| (v - mean) * (v - mean)).sum();
        (sum_sq / self.buffer.len() as f64).sqrt()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True once the populated count equals the capacity.
    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.max_size
    }

    /// Drops all stored samples and rewinds the write cursor.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.latest = 0;
    }
}

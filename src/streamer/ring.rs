//! Ring buffer with a compaction tail.
//!
//! The ring occupies `buf[..free_size]`. The slack after it is used to make a
//! span that crosses the wrap point contiguous: the wrapped head bytes are
//! copied past the end of the ring before the span is handed out.

/// Why a span couldn't be handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Not enough bytes buffered yet
    Underflow,
    /// Larger than the largest single read the ring was set up for
    TooLarge,
}

/// Bytes always kept free so that a full ring can't be mistaken for an empty one
pub const LOAD_GUARD: usize = 4;

#[derive(Default, Debug)]
pub struct Ring {
    buf: Vec<u8>,
    free_size: usize,
    max_read: usize,
    read: usize,
    load: usize,
}

impl Ring {
    /// Set up the ring for a buffer of `size` bytes. `free_size` of them form the ring.
    pub fn reset(&mut self, size: usize, free_size: usize, max_read: usize) {
        self.buf.clear();
        self.buf.resize(size.max(free_size + max_read), 0);
        self.free_size = free_size;
        self.max_read = max_read;
        self.read = 0;
        self.load = 0;
    }
    /// Usable ring capacity
    pub const fn free_size(&self) -> usize {
        self.free_size
    }
    #[cfg(test)]
    pub const fn read_index(&self) -> usize {
        self.read
    }
    #[cfg(test)]
    pub const fn load_index(&self) -> usize {
        self.load
    }
    /// Amount of buffered bytes, `(load - read) mod free_size`
    pub const fn buffered(&self) -> usize {
        if self.free_size == 0 {
            return 0;
        }
        (self.load + self.free_size - self.read) % self.free_size
    }
    const fn wrap(&self, idx: usize) -> usize {
        if idx >= self.free_size {
            idx - self.free_size
        } else {
            idx
        }
    }
    /// Make `len` bytes starting `at` bytes past the read index contiguous, and return them.
    pub fn peek_contiguous(&mut self, at: usize, len: usize) -> Result<&[u8], RingError> {
        if len > self.max_read {
            return Err(RingError::TooLarge);
        }
        if at + len > self.buffered() {
            return Err(RingError::Underflow);
        }
        let start = self.wrap(self.read + at);
        let end = start + len;
        if end > self.free_size {
            let (ring, tail) = self.buf.split_at_mut(self.free_size);
            let wrapped = end - self.free_size;
            tail[..wrapped].copy_from_slice(&ring[..wrapped]);
        }
        Ok(&self.buf[start..end])
    }
    /// Hand out `len` bytes at the read index and consume them
    pub fn take(&mut self, len: usize) -> Result<&[u8], RingError> {
        let start = self.wrap(self.read);
        self.peek_contiguous(0, len)?;
        self.read = self.wrap(self.read + len);
        Ok(&self.buf[start..start + len])
    }
    /// Move the read index forward by `amount`, without looking at the data
    pub const fn skip(&mut self, amount: usize) {
        if self.free_size != 0 {
            self.read = (self.read + amount) % self.free_size;
        }
    }
    /// Keep only the first `amount` buffered bytes
    pub const fn set_load_relative(&mut self, amount: usize) {
        if self.free_size != 0 {
            self.load = (self.read + amount) % self.free_size;
        }
    }
    /// How much can be loaded in one contiguous piece right now
    pub const fn load_space(&self) -> usize {
        let free = self
            .free_size
            .saturating_sub(self.buffered())
            .saturating_sub(LOAD_GUARD);
        let contiguous = self.free_size - self.load;
        if free < contiguous { free } else { contiguous }
    }
    /// Destination for the next load of `len` bytes, which must fit [`Self::load_space`]
    pub fn load_slice(&mut self, len: usize) -> &mut [u8] {
        &mut self.buf[self.load..self.load + len]
    }
    pub const fn advance_load(&mut self, len: usize) {
        self.load = self.wrap(self.load + len);
    }
    /// Append `data`, wrapping around as needed. The caller makes room first.
    pub fn push(&mut self, mut data: &[u8]) {
        while !data.is_empty() && self.free_size != 0 {
            let chunk = data.len().min(self.free_size - self.load);
            self.buf[self.load..self.load + chunk].copy_from_slice(&data[..chunk]);
            self.advance_load(chunk);
            data = &data[chunk..];
        }
    }
}

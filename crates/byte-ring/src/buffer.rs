//! Byte Ring Implementation

/// Default buffer size as a power of two (1024 bytes)
pub const DEFAULT_SHIFT: u32 = 10;

/// Largest accepted size exponent (1 MiB)
pub const MAX_SHIFT: u32 = 20;

/// Fixed-capacity circular byte buffer.
///
/// The backing storage holds `2^shift` bytes, one of which is always left
/// unused so that `first == last` unambiguously means "empty". Writes that do
/// not fit are truncated: the excess is dropped and counted, never an error.
#[derive(Debug, Clone)]
pub struct ByteRing {
    /// Backing storage, length is a power of two
    storage: Box<[u8]>,
    /// Read cursor
    first: usize,
    /// Write cursor
    last: usize,
    /// Total bytes accepted by `write` (for statistics)
    total_written: usize,
    /// Total bytes rejected by `write` because the ring was full
    total_dropped: usize,
}

impl ByteRing {
    /// Create a ring with `2^shift_length` bytes of storage.
    ///
    /// The exponent is clamped to `1..=MAX_SHIFT`.
    pub fn new(shift_length: u32) -> Self {
        let shift = shift_length.clamp(1, MAX_SHIFT);
        Self {
            storage: vec![0u8; 1usize << shift].into_boxed_slice(),
            first: 0,
            last: 0,
            total_written: 0,
            total_dropped: 0,
        }
    }

    /// Create a ring with the default 1024-byte storage
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_SHIFT)
    }

    fn mask(&self) -> usize {
        self.storage.len() - 1
    }

    /// Size of the backing storage (a power of two)
    pub fn buffer_size(&self) -> usize {
        self.storage.len()
    }

    /// Usable capacity: one slot less than the backing storage
    pub fn capacity(&self) -> usize {
        self.storage.len() - 1
    }

    /// Number of bytes currently stored
    pub fn len(&self) -> usize {
        self.last.wrapping_sub(self.first) & self.mask()
    }

    pub fn is_empty(&self) -> bool {
        self.first == self.last
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Bytes that can still be written before data starts being dropped
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Store as much of `data` as fits and return how many bytes were kept.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let push = data.len().min(self.free());
        let to_end = self.storage.len() - self.last;
        let head = push.min(to_end);

        self.storage[self.last..self.last + head].copy_from_slice(&data[..head]);
        let wrapped = push - head;
        if wrapped > 0 {
            self.storage[..wrapped].copy_from_slice(&data[head..push]);
        }
        self.last = (self.last + push) & self.mask();

        self.total_written += push;
        self.total_dropped += data.len() - push;
        push
    }

    /// Move up to `buf.len()` of the oldest bytes into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let pop = buf.len().min(self.len());
        let to_end = self.storage.len() - self.first;
        let head = pop.min(to_end);

        buf[..head].copy_from_slice(&self.storage[self.first..self.first + head]);
        let wrapped = pop - head;
        if wrapped > 0 {
            buf[head..pop].copy_from_slice(&self.storage[..wrapped]);
        }
        self.first = (self.first + pop) & self.mask();
        pop
    }

    /// Discard everything stored
    pub fn clear(&mut self) {
        self.first = 0;
        self.last = 0;
    }

    /// Total bytes ever accepted by `write`
    pub fn total_written(&self) -> usize {
        self.total_written
    }

    /// Total bytes ever dropped by `write` for lack of room
    pub fn total_dropped(&self) -> usize {
        self.total_dropped
    }
}

impl Default for ByteRing {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

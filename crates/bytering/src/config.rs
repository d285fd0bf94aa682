/// Configuration for a staging ring.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Ring capacity in bytes as a power of 2 (default: 20 = 1 MiB per ring)
    pub buffer_bits: u8,
}

impl RingConfig {
    /// Creates a new configuration with a custom per-ring capacity.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_bits` is below 12 (4 KiB) or above 30 (1 GiB).
    /// The lower bound keeps room for at least a few records; the upper
    /// bound prevents accidental multi-gigabyte allocations per thread.
    pub const fn new(buffer_bits: u8) -> Self {
        assert!(
            buffer_bits >= 12 && buffer_bits <= 30,
            "buffer_bits must be between 12 (4 KiB) and 30 (1 GiB)"
        );
        Self { buffer_bits }
    }

    /// Creates a configuration from a byte capacity.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is not a power of two in the supported range.
    pub const fn with_capacity(bytes: usize) -> Self {
        assert!(bytes.is_power_of_two(), "ring capacity must be a power of 2");
        Self::new(bytes.trailing_zeros() as u8)
    }

    /// Returns the capacity of the ring in bytes.
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.buffer_bits
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { buffer_bits: 20 } // 1 MiB
    }
}

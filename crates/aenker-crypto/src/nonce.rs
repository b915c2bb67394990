//! Monotonic nonce counter for chunk AEADs
//!
//! The counter value is encoded little-endian into the first eight bytes of
//! the nonce; the remaining bytes stay zero. A counter belongs to exactly one
//! chunk cipher and is never rewound.

/// Widest nonce a counter can produce.
pub const MAX_NONCE_SIZE: usize = 32;

#[derive(Debug)]
pub struct NonceCounter {
    counter: u64,
    nonce: [u8; MAX_NONCE_SIZE],
    size: usize,
}

impl NonceCounter {
    /// A counter starting at zero that emits nonces of `size` bytes.
    /// `size` is clamped to [`MAX_NONCE_SIZE`].
    pub fn new(size: usize) -> Self {
        Self {
            counter: 0,
            nonce: [0u8; MAX_NONCE_SIZE],
            size: size.min(MAX_NONCE_SIZE),
        }
    }

    /// Return the nonce for the current value, then increment.
    ///
    /// Overflow after 2^64 calls is a hard limit of the construction.
    pub fn next(&mut self) -> &[u8] {
        let encoded = self.counter.to_le_bytes();
        let n = encoded.len().min(self.size);
        self.nonce[..n].copy_from_slice(&encoded[..n]);
        self.counter += 1;
        &self.nonce[..self.size]
    }

    /// Number of nonces handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

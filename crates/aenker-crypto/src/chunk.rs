//! Per-chunk AEAD with counter nonces
//!
//! Sealed chunk format (binary):
//! ```text
//! [chunk_size bytes: padded plaintext, encrypted][16 bytes: Poly1305 tag]
//! nonce = chunk counter (little-endian, zero-padded to the AEAD nonce size)
//! AAD   = "Aenker Chunk" || chunk_size (4 bytes, little-endian)
//! ```
//!
//! No nonce is stored: both sides count chunks. Reordered or dropped chunks
//! therefore fail authentication, and the AAD binds every chunk to the chunk
//! size it was written with.
//!
//! A [`ChunkSealer`] and a [`ChunkOpener`] each own their counter. Because
//! the directions are separate types, one counter can never serve both.

use chacha20poly1305::aead::generic_array::typenum::Unsigned;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, Nonce, Payload};
use chacha20poly1305::ChaCha20Poly1305;

use aenker_core::{validate_chunk_size, AenkerError, AenkerResult};

use crate::keys::MediaKey;
use crate::nonce::NonceCounter;

/// Associated data prefix for every chunk.
pub const CHUNK_AD: &[u8] = b"Aenker Chunk";

/// Seal/open capability the chunk cipher is built on.
///
/// Implemented for every RustCrypto AEAD that takes a 32-byte key, so the
/// default ChaCha20-Poly1305 can be swapped for e.g. AES-256-GCM without
/// touching the stream code.
pub trait ChunkAead: Sized {
    /// Nonce length in bytes.
    const NONCE_SIZE: usize;
    /// Authentication tag length in bytes.
    const TAG_SIZE: usize;

    fn from_key(key: &[u8]) -> AenkerResult<Self>;

    fn seal(&self, nonce: &[u8], plaintext: &[u8], associated_data: &[u8]) -> AenkerResult<Vec<u8>>;

    fn open(&self, nonce: &[u8], ciphertext: &[u8], associated_data: &[u8])
        -> AenkerResult<Vec<u8>>;
}

impl<T> ChunkAead for T
where
    T: Aead + AeadCore + KeyInit,
{
    const NONCE_SIZE: usize = <<T as AeadCore>::NonceSize as Unsigned>::USIZE;
    const TAG_SIZE: usize = <<T as AeadCore>::TagSize as Unsigned>::USIZE;

    fn from_key(key: &[u8]) -> AenkerResult<Self> {
        T::new_from_slice(key)
            .map_err(|_| AenkerError::Config(format!("AEAD rejected a {}-byte key", key.len())))
    }

    fn seal(&self, nonce: &[u8], plaintext: &[u8], associated_data: &[u8]) -> AenkerResult<Vec<u8>> {
        check_nonce::<T>(nonce)?;
        self.encrypt(
            Nonce::<T>::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|e| AenkerError::Config(format!("chunk encryption failed: {e}")))
    }

    fn open(
        &self,
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> AenkerResult<Vec<u8>> {
        check_nonce::<T>(nonce)?;
        self.decrypt(
            Nonce::<T>::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| AenkerError::Authentication("chunk"))
    }
}

fn check_nonce<T: AeadCore>(nonce: &[u8]) -> AenkerResult<()> {
    let expected = <<T as AeadCore>::NonceSize as Unsigned>::USIZE;
    if nonce.len() != expected {
        return Err(AenkerError::Config(format!(
            "nonce is {} bytes, AEAD expects {expected}",
            nonce.len()
        )));
    }
    Ok(())
}

/// Build AAD: "Aenker Chunk" || chunk_size (4 bytes LE)
pub fn chunk_associated_data(chunk_size: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(CHUNK_AD.len() + 4);
    aad.extend_from_slice(CHUNK_AD);
    aad.extend_from_slice(&chunk_size.to_le_bytes());
    aad
}

/// One AEAD instance, one nonce counter, fixed associated data.
struct ChunkCipher<A> {
    aead: A,
    counter: NonceCounter,
    associated_data: Vec<u8>,
    chunk_size: usize,
}

impl<A: ChunkAead> ChunkCipher<A> {
    fn new(key: &MediaKey, chunk_size: usize) -> AenkerResult<Self> {
        let encoded = validate_chunk_size(chunk_size)?;
        Ok(Self {
            aead: A::from_key(key.as_bytes())?,
            counter: NonceCounter::new(A::NONCE_SIZE),
            associated_data: chunk_associated_data(encoded),
            chunk_size,
        })
    }
}

/// Encrypting half of a chunk cipher.
pub struct ChunkSealer<A = ChaCha20Poly1305> {
    cipher: ChunkCipher<A>,
}

impl ChunkSealer {
    /// A ChaCha20-Poly1305 sealer for chunks of `chunk_size` plaintext bytes.
    pub fn new(key: &MediaKey, chunk_size: usize) -> AenkerResult<Self> {
        Self::with_aead(key, chunk_size)
    }
}

impl<A: ChunkAead> ChunkSealer<A> {
    pub fn with_aead(key: &MediaKey, chunk_size: usize) -> AenkerResult<Self> {
        Ok(Self {
            cipher: ChunkCipher::new(key, chunk_size)?,
        })
    }

    /// Seal one padded chunk under the next counter nonce.
    ///
    /// Returns `chunk_size + TAG_SIZE` bytes for a correctly padded chunk.
    pub fn seal(&mut self, padded: &[u8]) -> AenkerResult<Vec<u8>> {
        let ChunkCipher {
            aead,
            counter,
            associated_data,
            ..
        } = &mut self.cipher;
        aead.seal(counter.next(), padded, associated_data.as_slice())
    }

    pub fn chunk_size(&self) -> usize {
        self.cipher.chunk_size
    }

    /// Size of one sealed chunk on the wire.
    pub fn sealed_size(&self) -> usize {
        self.cipher.chunk_size + A::TAG_SIZE
    }

    pub fn chunks_sealed(&self) -> u64 {
        self.cipher.counter.issued()
    }
}

/// Decrypting half of a chunk cipher.
pub struct ChunkOpener<A = ChaCha20Poly1305> {
    cipher: ChunkCipher<A>,
}

impl ChunkOpener {
    /// A ChaCha20-Poly1305 opener for chunks of `chunk_size` plaintext bytes.
    pub fn new(key: &MediaKey, chunk_size: usize) -> AenkerResult<Self> {
        Self::with_aead(key, chunk_size)
    }
}

impl<A: ChunkAead> ChunkOpener<A> {
    pub fn with_aead(key: &MediaKey, chunk_size: usize) -> AenkerResult<Self> {
        Ok(Self {
            cipher: ChunkCipher::new(key, chunk_size)?,
        })
    }

    /// Authenticate and decrypt the next chunk. The counter advances even
    /// when authentication fails; the stream is unusable after that anyway.
    pub fn open(&mut self, sealed: &[u8]) -> AenkerResult<Vec<u8>> {
        let ChunkCipher {
            aead,
            counter,
            associated_data,
            ..
        } = &mut self.cipher;
        aead.open(counter.next(), sealed, associated_data.as_slice())
    }

    pub fn chunk_size(&self) -> usize {
        self.cipher.chunk_size
    }

    pub fn sealed_size(&self) -> usize {
        self.cipher.chunk_size + A::TAG_SIZE
    }

    pub fn chunks_opened(&self) -> u64 {
        self.cipher.counter.issued()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_media_key;
    use crate::TAG_SIZE;
    use aes_gcm::Aes256Gcm;
    use chacha20poly1305::XChaCha20Poly1305;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = generate_media_key();
        let mut sealer = ChunkSealer::new(&key, 16).unwrap();
        let mut opener = ChunkOpener::new(&key, 16).unwrap();

        let first = sealer.seal(b"0123456789abcde\x00").unwrap();
        let second = sealer.seal(b"hello\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x02").unwrap();

        assert_eq!(opener.open(&first).unwrap(), b"0123456789abcde\x00");
        assert_eq!(
            opener.open(&second).unwrap(),
            b"hello\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x02"
        );
        assert_eq!(sealer.chunks_sealed(), 2);
        assert_eq!(opener.chunks_opened(), 2);
    }

    #[test]
    fn test_sealed_size() {
        let key = generate_media_key();
        let mut sealer = ChunkSealer::new(&key, 1984).unwrap();
        let sealed = sealer.seal(&[0x42; 1984]).unwrap();

        assert_eq!(sealed.len(), 1984 + TAG_SIZE);
        assert_eq!(sealer.sealed_size(), 2000);
    }

    #[test]
    fn test_same_plaintext_differs_per_position() {
        let key = generate_media_key();
        let mut sealer = ChunkSealer::new(&key, 8).unwrap();

        let a = sealer.seal(b"abcdefg\x00").unwrap();
        let b = sealer.seal(b"abcdefg\x00").unwrap();
        assert_ne!(a, b, "each chunk must use a fresh nonce");
    }

    #[test]
    fn test_reordered_chunks_fail() {
        let key = generate_media_key();
        let mut sealer = ChunkSealer::new(&key, 8).unwrap();
        let mut opener = ChunkOpener::new(&key, 8).unwrap();

        let _first = sealer.seal(b"abcdefg\x00").unwrap();
        let second = sealer.seal(b"hijklmn\x00").unwrap();

        let result = opener.open(&second);
        assert!(
            matches!(result, Err(AenkerError::Authentication(_))),
            "chunk opened at the wrong position must fail"
        );
    }

    #[test]
    fn test_chunk_size_is_bound_into_aad() {
        let key = generate_media_key();
        let mut sealer = ChunkSealer::new(&key, 8).unwrap();
        let mut opener = ChunkOpener::new(&key, 9).unwrap();

        let sealed = sealer.seal(b"abcdefg\x00").unwrap();
        assert!(opener.open(&sealed).is_err(), "mismatched chunk size must fail");
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut sealer = ChunkSealer::new(&generate_media_key(), 8).unwrap();
        let mut opener = ChunkOpener::new(&generate_media_key(), 8).unwrap();

        let sealed = sealer.seal(b"abcdefg\x00").unwrap();
        assert!(matches!(opener.open(&sealed), Err(AenkerError::Authentication(_))));
    }

    #[test]
    fn test_tampered_chunk_fails() {
        let key = generate_media_key();
        let mut sealer = ChunkSealer::new(&key, 8).unwrap();
        let mut opener = ChunkOpener::new(&key, 8).unwrap();

        let mut sealed = sealer.seal(b"abcdefg\x00").unwrap();
        sealed[3] ^= 0x01;
        assert!(matches!(opener.open(&sealed), Err(AenkerError::Authentication(_))));
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let key = generate_media_key();
        assert!(matches!(ChunkSealer::new(&key, 1), Err(AenkerError::Config(_))));
        assert!(matches!(ChunkOpener::new(&key, 0), Err(AenkerError::Config(_))));
    }

    #[test]
    fn test_associated_data_layout() {
        let aad = chunk_associated_data(1984);
        assert_eq!(&aad[..12], b"Aenker Chunk");
        assert_eq!(&aad[12..], &[0xC0, 0x07, 0x00, 0x00]);
    }

    #[test]
    fn test_alternative_aead_providers() {
        let key = generate_media_key();

        let mut sealer = ChunkSealer::<Aes256Gcm>::with_aead(&key, 32).unwrap();
        let mut opener = ChunkOpener::<Aes256Gcm>::with_aead(&key, 32).unwrap();
        let sealed = sealer.seal(&[7u8; 32]).unwrap();
        assert_eq!(opener.open(&sealed).unwrap(), vec![7u8; 32]);

        let mut sealer = ChunkSealer::<XChaCha20Poly1305>::with_aead(&key, 32).unwrap();
        let mut opener = ChunkOpener::<XChaCha20Poly1305>::with_aead(&key, 32).unwrap();
        let sealed = sealer.seal(&[9u8; 32]).unwrap();
        assert_eq!(opener.open(&sealed).unwrap(), vec![9u8; 32]);
    }

    #[test]
    fn test_providers_are_not_interchangeable() {
        let key = generate_media_key();
        let mut sealer = ChunkSealer::<Aes256Gcm>::with_aead(&key, 32).unwrap();
        let mut opener = ChunkOpener::new(&key, 32).unwrap();

        let sealed = sealer.seal(&[7u8; 32]).unwrap();
        assert!(opener.open(&sealed).is_err());
    }

    #[test]
    fn test_provider_constants() {
        assert_eq!(<ChaCha20Poly1305 as ChunkAead>::NONCE_SIZE, 12);
        assert_eq!(<ChaCha20Poly1305 as ChunkAead>::TAG_SIZE, 16);
        assert_eq!(<XChaCha20Poly1305 as ChunkAead>::NONCE_SIZE, 24);
        assert_eq!(<Aes256Gcm as ChunkAead>::NONCE_SIZE, 12);
    }
}

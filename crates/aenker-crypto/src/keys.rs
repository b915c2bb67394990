//! Media encryption keys and their sealed blobs
//!
//! Each stream gets a fresh random media encryption key (MEK). The MEK is
//! sealed under the stream's KEK and stored right after the header:
//! ```text
//! [24 bytes: random XChaCha20 nonce][32 bytes: sealed MEK][16 bytes: tag]
//! AAD = "Aenker Media Encryption Key"
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroize;

use aenker_core::{AenkerError, AenkerResult};

use crate::kdf::Kek;
use crate::{KEY_SIZE, MEK_BLOB_SIZE, TAG_SIZE, XNONCE_SIZE};

/// Associated data for sealing a MEK.
pub const MEK_AD: &[u8] = b"Aenker Media Encryption Key";

/// A per-stream 256-bit chunk key. Zeroized on drop.
#[derive(Clone)]
pub struct MediaKey {
    bytes: [u8; KEY_SIZE],
}

impl MediaKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MediaKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MediaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit media encryption key.
pub fn generate_media_key() -> MediaKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    MediaKey::from_bytes(bytes)
}

/// A sealed MEK as it appears on the wire. Not secret.
#[derive(Clone, PartialEq, Eq)]
pub struct MekBlob([u8; MEK_BLOB_SIZE]);

impl MekBlob {
    pub fn as_bytes(&self) -> &[u8; MEK_BLOB_SIZE] {
        &self.0
    }

    /// Accepts exactly [`MEK_BLOB_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> AenkerResult<Self> {
        let blob: [u8; MEK_BLOB_SIZE] = bytes.try_into().map_err(|_| {
            AenkerError::Format(format!(
                "media key blob is {} bytes (expected {MEK_BLOB_SIZE})",
                bytes.len()
            ))
        })?;
        Ok(Self(blob))
    }
}

impl std::fmt::Debug for MekBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MekBlob").field(&MEK_BLOB_SIZE).finish()
    }
}

/// Generate a fresh MEK and seal it under `kek` with a random nonce.
pub fn seal_new_mek(kek: &Kek) -> AenkerResult<(MediaKey, MekBlob)> {
    let mek = generate_media_key();
    let cipher = XChaCha20Poly1305::new(kek.as_bytes().into());

    let mut nonce_bytes = [0u8; XNONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let sealed = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: mek.as_bytes(),
                aad: MEK_AD,
            },
        )
        .map_err(|e| AenkerError::Kdf(format!("media key sealing failed: {e}")))?;

    let mut blob = [0u8; MEK_BLOB_SIZE];
    blob[..XNONCE_SIZE].copy_from_slice(&nonce_bytes);
    blob[XNONCE_SIZE..].copy_from_slice(&sealed);
    debug!("media key sealed");
    Ok((mek, MekBlob(blob)))
}

/// Open a sealed MEK blob. A wrong KEK, and therefore a wrong key or
/// password on the reading side, fails here.
pub fn open_mek(kek: &Kek, blob: &[u8]) -> AenkerResult<MediaKey> {
    if blob.len() != MEK_BLOB_SIZE {
        return Err(AenkerError::Format(format!(
            "media key blob is {} bytes (expected {MEK_BLOB_SIZE})",
            blob.len()
        )));
    }

    let (nonce_bytes, sealed) = blob.split_at(XNONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(kek.as_bytes().into());

    let mut plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce_bytes),
            Payload {
                msg: sealed,
                aad: MEK_AD,
            },
        )
        .map_err(|_| {
            debug!("media key failed to open");
            AenkerError::Authentication("media key")
        })?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(AenkerError::Format(format!(
            "media key has wrong size: {} bytes (expected {KEY_SIZE})",
            plaintext.len()
        )));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    debug!("media key opened");
    Ok(MediaKey::from_bytes(key_bytes))
}

const _: () = assert!(MEK_BLOB_SIZE == XNONCE_SIZE + KEY_SIZE + TAG_SIZE);

//! aenker-crypto: chunked AEAD stream encryption
//!
//! Architecture: per-stream media key, chunk-then-encrypt with ChaCha20-Poly1305
//!
//! Pipeline: plaintext → fixed-size chunks → pad (marker byte) → seal (counter nonce) → write
//!
//! Key hierarchy:
//! ```text
//! KEK (256-bit, one of)
//!   ├── HKDF-BLAKE2b(static secret, salt, "aenker symmetric")
//!   ├── HKDF-BLAKE2b(Argon2i(password, salt), "aenker password")
//!   └── HKDF-BLAKE2b(X25519(ephemeral, recipient), salt, "aenker elliptic")
//!       └── Media Encryption Key (per-stream, 256-bit random, sealed by the KEK with XChaCha20-Poly1305)
//!           └── Chunk AEAD: ChaCha20-Poly1305 (key=MEK, nonce=chunk counter, AAD="Aenker Chunk"||chunk_size)
//! ```

pub mod aenker;
pub mod chunk;
pub mod header;
pub mod kdf;
pub mod keys;
pub mod nonce;
pub mod padding;
pub mod stream;

pub use aenker::{recipient_kek, Aenker, OpeningKey, SealingKey};
pub use chunk::{ChunkAead, ChunkOpener, ChunkSealer};
pub use header::{read_header, write_header, Header};
pub use kdf::{
    derive_private_key, generate_private_key, pbkdf_salt, public_key, KdfParams, Kek, Purpose,
    PASSWORD_PARAMS, PBKDF_PARAMS,
};
pub use keys::{generate_media_key, open_mek, seal_new_mek, MediaKey, MekBlob};
pub use stream::{decrypt_chunks, encrypt_chunks, ChunkReader, ChunkWriter, StreamState, StreamSummary};

pub use aes_gcm::Aes256Gcm;
pub use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
pub use secrecy::SecretString;
pub use x25519_dalek::{PublicKey, StaticSecret};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 chunk nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of an XChaCha20-Poly1305 nonce (192-bit), used for MEK blobs
pub const XNONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

pub use header::HEADER_SIZE;

/// Size of a sealed media key blob: nonce + key + tag
pub const MEK_BLOB_SIZE: usize = XNONCE_SIZE + KEY_SIZE + TAG_SIZE;

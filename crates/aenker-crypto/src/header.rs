//! Stream header: magic bytes, salt, ephemeral public key
//!
//! ```text
//! [8 bytes: "aenker" 0xE7 0x9E][8 bytes: salt][32 bytes: ephemeral X25519 public key]
//! ```
//! The two bytes after "aenker" are the first two bytes of its BLAKE2b hash.
//!
//! The header is not authenticated on its own. Reading it with the wrong
//! private key succeeds and yields a wrong KEK; the error surfaces when the
//! media key blob that follows fails to open.

use std::io::{Read, Write};

use rand::RngCore;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

use aenker_core::{AenkerError, AenkerResult};

use crate::kdf::{self, Kek, Purpose};

pub const MAGIC: [u8; 8] = *b"aenker\xe7\x9e";
pub const SALT_SIZE: usize = 8;
pub const HEADER_SIZE: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub salt: [u8; SALT_SIZE],
    pub ephemeral: [u8; 32],
}

impl Header {
    /// A header with a fresh random salt and an all-zero ephemeral field.
    pub fn generate_salted() -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            salt,
            ephemeral: [0u8; 32],
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..8].copy_from_slice(&MAGIC);
        out[8..16].copy_from_slice(&self.salt);
        out[16..].copy_from_slice(&self.ephemeral);
        out
    }

    /// Parse a header. The magic check is a plain comparison since the
    /// bytes are public.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> AenkerResult<Self> {
        if bytes[..8] != MAGIC {
            return Err(AenkerError::Format("unknown magic bytes".into()));
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[8..16]);
        let mut ephemeral = [0u8; 32];
        ephemeral.copy_from_slice(&bytes[16..]);
        Ok(Self { salt, ephemeral })
    }

    pub fn write_to<W: Write + ?Sized>(&self, sink: &mut W) -> AenkerResult<()> {
        sink.write_all(&self.to_bytes())?;
        debug!(ephemeral = self.ephemeral != [0u8; 32], "header written");
        Ok(())
    }

    /// Read exactly [`HEADER_SIZE`] bytes. A short source is truncated
    /// ciphertext, not a format error.
    pub fn read_from<R: Read + ?Sized>(source: &mut R) -> AenkerResult<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        read_exact_or_truncated(source, &mut buf)?;
        let header = Self::from_bytes(&buf)?;
        debug!(ephemeral = header.ephemeral != [0u8; 32], "header parsed");
        Ok(header)
    }

    pub fn ephemeral_public(&self) -> PublicKey {
        PublicKey::from(self.ephemeral)
    }
}

/// `read_exact` that reports a short source as truncated ciphertext.
pub(crate) fn read_exact_or_truncated<R: Read + ?Sized>(
    source: &mut R,
    buf: &mut [u8],
) -> AenkerResult<()> {
    source.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => AenkerError::Truncated,
        _ => AenkerError::Io(e),
    })
}

/// Write a header for `peer` and return the KEK both sides will share.
///
/// A fresh ephemeral key pair is generated; only its public half is
/// serialized.
pub fn write_header<W: Write + ?Sized>(sink: &mut W, peer: &PublicKey) -> AenkerResult<Kek> {
    let mut header = Header::generate_salted();
    let ephemeral = kdf::generate_private_key();
    let kek = kdf::elliptic(&ephemeral, peer, &header.salt, Purpose::Elliptic)?;
    header.ephemeral = kdf::public_key(&ephemeral).to_bytes();
    header.write_to(sink)?;
    Ok(kek)
}

/// Read a header and derive the KEK with `private`.
pub fn read_header<R: Read + ?Sized>(source: &mut R, private: &StaticSecret) -> AenkerResult<Kek> {
    let header = Header::read_from(source)?;
    kdf::elliptic(
        private,
        &header.ephemeral_public(),
        &header.salt,
        Purpose::Elliptic,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_magic_bytes() {
        assert_eq!(&MAGIC[..6], b"aenker");
        assert_eq!(MAGIC[6..], [0xE7, 0x9E]);
    }

    #[test]
    fn test_layout() {
        let header = Header {
            salt: [1u8; 8],
            ephemeral: [2u8; 32],
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..8], &MAGIC);
        assert_eq!(&bytes[8..16], &[1u8; 8]);
        assert_eq!(&bytes[16..], &[2u8; 32]);
        assert_eq!(Header::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Header::generate_salted().to_bytes();
        bytes[0] = b'A';
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(AenkerError::Format(_))
        ));
    }

    #[test]
    fn test_short_header_is_truncated() {
        let bytes = Header::generate_salted().to_bytes();
        let mut source = Cursor::new(&bytes[..HEADER_SIZE - 1]);
        assert!(matches!(
            Header::read_from(&mut source),
            Err(AenkerError::Truncated)
        ));
    }

    #[test]
    fn test_salts_are_fresh() {
        assert_ne!(Header::generate_salted().salt, Header::generate_salted().salt);
    }

    #[test]
    fn test_write_read_agree() {
        let private = kdf::generate_private_key();
        let public = kdf::public_key(&private);

        let mut buf = Vec::new();
        let sender_kek = write_header(&mut buf, &public).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let receiver_kek = read_header(&mut Cursor::new(&buf), &private).unwrap();
        assert_eq!(sender_kek.as_bytes(), receiver_kek.as_bytes());
    }

    #[test]
    fn test_ephemeral_key_is_fresh() {
        let public = kdf::public_key(&kdf::generate_private_key());
        let mut first = Vec::new();
        let mut second = Vec::new();
        let k1 = write_header(&mut first, &public).unwrap();
        let k2 = write_header(&mut second, &public).unwrap();

        assert_ne!(first[16..], second[16..], "ephemeral keys must differ");
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_wrong_private_key_parses_but_disagrees() {
        let private = kdf::generate_private_key();
        let intruder = kdf::generate_private_key();

        let mut buf = Vec::new();
        let sender_kek = write_header(&mut buf, &kdf::public_key(&private)).unwrap();

        let wrong_kek = read_header(&mut Cursor::new(&buf), &intruder)
            .expect("header parsing does not authenticate");
        assert_ne!(sender_kek.as_bytes(), wrong_kek.as_bytes());
    }
}

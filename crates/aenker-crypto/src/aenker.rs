//! Whole-stream encryption: header, sealed media key, chunks
//!
//! ```text
//! [48 bytes: header][72 bytes: MEK blob][chunk_size + 16 bytes] ...
//! ```
//! The key mode is not recorded in the stream. The reader picks it by the
//! key material it supplies; symmetric and password streams carry an
//! all-zero ephemeral field that is never looked at.

use std::io::{Read, Write};

use secrecy::SecretString;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

use aenker_core::{validate_chunk_size, AenkerConfig, AenkerResult, DEFAULT_CHUNK_SIZE};

use crate::chunk::{ChunkOpener, ChunkSealer};
use crate::header::{self, read_exact_or_truncated, Header};
use crate::kdf::{self, KdfParams, Kek, Purpose, PASSWORD_PARAMS};
use crate::keys::{open_mek, seal_new_mek};
use crate::stream::{decrypt_chunks, encrypt_chunks, ChunkReader, ChunkWriter, StreamSummary};
use crate::MEK_BLOB_SIZE;

/// Key material for writing a stream.
pub enum SealingKey {
    /// A 32-byte secret shared with the reader.
    Symmetric(Kek),
    Password(SecretString),
    /// The reader's X25519 public key.
    Recipient(PublicKey),
}

/// Key material for reading a stream. Must match the mode it was written
/// with.
pub enum OpeningKey {
    Symmetric(Kek),
    Password(SecretString),
    /// The private half of the key the stream was sealed to.
    Private(StaticSecret),
}

impl SealingKey {
    fn mode(&self) -> &'static str {
        match self {
            Self::Symmetric(_) => "symmetric",
            Self::Password(_) => "password",
            Self::Recipient(_) => "elliptic",
        }
    }
}

impl OpeningKey {
    fn mode(&self) -> &'static str {
        match self {
            Self::Symmetric(_) => "symmetric",
            Self::Password(_) => "password",
            Self::Private(_) => "elliptic",
        }
    }
}

/// Stream encryptor/decryptor with a fixed chunk size.
#[derive(Debug, Clone)]
pub struct Aenker {
    chunk_size: usize,
    kdf_params: KdfParams,
}

impl Default for Aenker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf_params: PASSWORD_PARAMS,
        }
    }
}

impl Aenker {
    pub fn new(chunk_size: usize) -> AenkerResult<Self> {
        validate_chunk_size(chunk_size)?;
        Ok(Self {
            chunk_size,
            kdf_params: PASSWORD_PARAMS,
        })
    }

    /// Takes the chunk size from `config`. The password cost is always
    /// [`PASSWORD_PARAMS`].
    pub fn from_config(config: &AenkerConfig) -> AenkerResult<Self> {
        Self::new(config.stream.chunk_size)
    }

    /// Override the Argon2i cost of password mode. Streams written this way
    /// only open with the same parameters, which the stream does not
    /// record; meant for tests and benchmarks.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.kdf_params
    }

    /// Write the header for `key` and return the stream's KEK.
    fn seal_header<W: Write + ?Sized>(&self, key: &SealingKey, sink: &mut W) -> AenkerResult<Kek> {
        match key {
            SealingKey::Recipient(peer) => header::write_header(sink, peer),
            SealingKey::Symmetric(secret) => {
                let header = Header::generate_salted();
                let kek = kdf::symmetric(secret, &header.salt)?;
                header.write_to(sink)?;
                Ok(kek)
            }
            SealingKey::Password(password) => {
                let header = Header::generate_salted();
                let kek = kdf::password(password, &header.salt, &self.kdf_params)?;
                header.write_to(sink)?;
                Ok(kek)
            }
        }
    }

    /// Read the header and derive the KEK `key` implies. A wrong key is not
    /// detected here.
    fn open_header<R: Read + ?Sized>(&self, key: &OpeningKey, source: &mut R) -> AenkerResult<Kek> {
        match key {
            OpeningKey::Private(private) => header::read_header(source, private),
            OpeningKey::Symmetric(secret) => {
                let header = Header::read_from(source)?;
                kdf::symmetric(secret, &header.salt)
            }
            OpeningKey::Password(password) => {
                let header = Header::read_from(source)?;
                kdf::password(password, &header.salt, &self.kdf_params)
            }
        }
    }

    /// Seal a fresh media key under `kek`, write its blob and return a
    /// sealer for the chunks.
    fn start_sealing<W: Write + ?Sized>(&self, kek: &Kek, sink: &mut W) -> AenkerResult<ChunkSealer> {
        let (mek, blob) = seal_new_mek(kek)?;
        sink.write_all(blob.as_bytes())?;
        ChunkSealer::new(&mek, self.chunk_size)
    }

    fn start_opening<R: Read + ?Sized>(&self, kek: &Kek, source: &mut R) -> AenkerResult<ChunkOpener> {
        let mut blob = [0u8; MEK_BLOB_SIZE];
        read_exact_or_truncated(source, &mut blob)?;
        let mek = open_mek(kek, &blob)?;
        ChunkOpener::new(&mek, self.chunk_size)
    }

    /// Encrypt `source` into `sink` as a complete stream.
    pub fn encrypt<R: Read, W: Write + ?Sized>(
        &self,
        key: &SealingKey,
        source: R,
        sink: &mut W,
    ) -> AenkerResult<StreamSummary> {
        debug!(mode = key.mode(), chunk_size = self.chunk_size, "encrypting stream");
        let kek = self.seal_header(key, sink)?;
        self.encrypt_with_kek(&kek, source, sink)
    }

    /// Decrypt a complete stream. Fails with an authentication error at the
    /// media key when `key` is wrong.
    pub fn decrypt<R: Read, W: Write + ?Sized>(
        &self,
        key: &OpeningKey,
        mut source: R,
        sink: &mut W,
    ) -> AenkerResult<StreamSummary> {
        debug!(mode = key.mode(), chunk_size = self.chunk_size, "decrypting stream");
        let kek = self.open_header(key, &mut source)?;
        self.decrypt_with_kek(&kek, source, sink)
    }

    /// Single-level mode: `[MEK blob][chunks]` under a caller-held KEK, no
    /// header.
    pub fn encrypt_with_kek<R: Read, W: Write + ?Sized>(
        &self,
        kek: &Kek,
        source: R,
        sink: &mut W,
    ) -> AenkerResult<StreamSummary> {
        let sealer = self.start_sealing(kek, sink)?;
        encrypt_chunks(sealer, source, sink)
    }

    pub fn decrypt_with_kek<R: Read, W: Write + ?Sized>(
        &self,
        kek: &Kek,
        mut source: R,
        sink: &mut W,
    ) -> AenkerResult<StreamSummary> {
        let opener = self.start_opening(kek, &mut source)?;
        decrypt_chunks(opener, source, sink)
    }

    /// Write header and MEK blob to `sink`, then return a writer for the
    /// plaintext. The stream is only complete after
    /// [`ChunkWriter::finish`].
    pub fn writer<W: Write>(&self, key: &SealingKey, mut sink: W) -> AenkerResult<ChunkWriter<W>> {
        let kek = self.seal_header(key, &mut sink)?;
        let sealer = self.start_sealing(&kek, &mut sink)?;
        Ok(ChunkWriter::new(sealer, sink))
    }

    /// Read header and MEK blob from `source`, then return a reader that
    /// yields the authenticated plaintext.
    pub fn reader<R: Read>(&self, key: &OpeningKey, mut source: R) -> AenkerResult<ChunkReader<R>> {
        let kek = self.open_header(key, &mut source)?;
        let opener = self.start_opening(&kek, &mut source)?;
        Ok(ChunkReader::new(opener, source))
    }
}

/// Derive the KEK an elliptic stream was written with, from the recipient
/// side. Exposed for callers that store headers separately.
pub fn recipient_kek(private: &StaticSecret, header: &Header) -> AenkerResult<Kek> {
    kdf::elliptic(private, &header.ephemeral_public(), &header.salt, Purpose::Elliptic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HEADER_SIZE, TAG_SIZE};
    use aenker_core::AenkerError;
    use std::io::Cursor;

    const MESSAGE: &[u8] = b"Clear is better than clever.\n";

    fn light() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn aenker() -> Aenker {
        Aenker::new(64).unwrap().with_kdf_params(light())
    }

    #[test]
    fn test_rejects_bad_chunk_size() {
        assert!(matches!(Aenker::new(1), Err(AenkerError::Config(_))));
        assert!(matches!(Aenker::new(0), Err(AenkerError::Config(_))));
    }

    #[test]
    fn test_from_config() {
        let config = AenkerConfig::from_toml("[stream]\nchunk_size = 512\n").unwrap();
        let ae = Aenker::from_config(&config).unwrap();
        assert_eq!(ae.chunk_size(), 512);
        assert_eq!(ae.kdf_params(), &KdfParams::default());
    }

    #[test]
    fn test_config_cannot_change_password_cost() {
        let plain = AenkerConfig::from_toml("").unwrap();
        let tuned = AenkerConfig::from_toml(
            "[stream]\nchunk_size = 256\n\n[password]\nargon2_time_cost = 1\nargon2_mem_cost_kib = 8\n",
        )
        .unwrap();

        let a = Aenker::from_config(&plain).unwrap();
        let b = Aenker::from_config(&tuned).unwrap();
        assert_eq!(a.kdf_params(), &PASSWORD_PARAMS);
        assert_eq!(b.kdf_params(), &PASSWORD_PARAMS);
    }

    #[test]
    fn test_symmetric_stream_layout() {
        let key = [5u8; 32];
        let mut ciphertext = Vec::new();
        aenker()
            .encrypt(&SealingKey::Symmetric(Kek::from_bytes(key)), MESSAGE, &mut ciphertext)
            .unwrap();

        assert_eq!(ciphertext.len(), HEADER_SIZE + MEK_BLOB_SIZE + 64 + TAG_SIZE);
        assert_eq!(&ciphertext[16..48], &[0u8; 32], "ephemeral field stays zero");

        let mut plaintext = Vec::new();
        aenker()
            .decrypt(&OpeningKey::Symmetric(Kek::from_bytes(key)), &ciphertext[..], &mut plaintext)
            .unwrap();
        assert_eq!(plaintext, MESSAGE);
    }

    #[test]
    fn test_symmetric_wrong_key_fails_at_media_key() {
        let mut ciphertext = Vec::new();
        aenker()
            .encrypt(&SealingKey::Symmetric(Kek::from_bytes([5u8; 32])), MESSAGE, &mut ciphertext)
            .unwrap();

        let result = aenker().decrypt(
            &OpeningKey::Symmetric(Kek::from_bytes([6u8; 32])),
            &ciphertext[..],
            &mut Vec::new(),
        );
        assert!(matches!(result, Err(AenkerError::Authentication("media key"))));
    }

    #[test]
    fn test_password_roundtrip() {
        let mut ciphertext = Vec::new();
        aenker()
            .encrypt(&SealingKey::Password(SecretString::from("swordfish")), MESSAGE, &mut ciphertext)
            .unwrap();

        let mut plaintext = Vec::new();
        aenker()
            .decrypt(&OpeningKey::Password(SecretString::from("swordfish")), &ciphertext[..], &mut plaintext)
            .unwrap();
        assert_eq!(plaintext, MESSAGE);

        let wrong = aenker().decrypt(
            &OpeningKey::Password(SecretString::from("sw0rdfish")),
            &ciphertext[..],
            &mut Vec::new(),
        );
        assert!(matches!(wrong, Err(AenkerError::Authentication("media key"))));
    }

    #[test]
    fn test_elliptic_roundtrip() {
        let private = kdf::generate_private_key();
        let public = kdf::public_key(&private);

        let mut ciphertext = Vec::new();
        aenker().encrypt(&SealingKey::Recipient(public), MESSAGE, &mut ciphertext).unwrap();

        let mut plaintext = Vec::new();
        let summary = aenker()
            .decrypt(&OpeningKey::Private(private), &ciphertext[..], &mut plaintext)
            .unwrap();
        assert_eq!(plaintext, MESSAGE);
        assert!(!summary.extra_data);
    }

    #[test]
    fn test_recipient_kek_matches_stream() {
        let private = kdf::generate_private_key();
        let mut ciphertext = Vec::new();
        aenker()
            .encrypt(&SealingKey::Recipient(kdf::public_key(&private)), MESSAGE, &mut ciphertext)
            .unwrap();

        let header_bytes: [u8; HEADER_SIZE] = ciphertext[..HEADER_SIZE].try_into().unwrap();
        let header = Header::from_bytes(&header_bytes).unwrap();
        let kek = recipient_kek(&private, &header).unwrap();

        let mut plaintext = Vec::new();
        aenker()
            .decrypt_with_kek(&kek, &ciphertext[HEADER_SIZE..], &mut plaintext)
            .unwrap();
        assert_eq!(plaintext, MESSAGE);
    }

    #[test]
    fn test_single_level_mode() {
        let kek = Kek::from_bytes([9u8; 32]);
        let mut ciphertext = Vec::new();
        aenker().encrypt_with_kek(&kek, MESSAGE, &mut ciphertext).unwrap();
        assert_eq!(ciphertext.len(), MEK_BLOB_SIZE + 64 + TAG_SIZE, "no header");

        let mut plaintext = Vec::new();
        aenker().decrypt_with_kek(&kek, &ciphertext[..], &mut plaintext).unwrap();
        assert_eq!(plaintext, MESSAGE);
    }

    #[test]
    fn test_writer_and_reader() {
        let secret = [3u8; 32];
        let mut writer = aenker()
            .writer(&SealingKey::Symmetric(Kek::from_bytes(secret)), Vec::new())
            .unwrap();
        writer.write_all(b"Clear is better ").unwrap();
        writer.write_all(b"than clever.\n").unwrap();
        writer.finish().unwrap();
        let ciphertext = writer.into_inner();

        let mut reader = aenker()
            .reader(&OpeningKey::Symmetric(Kek::from_bytes(secret)), Cursor::new(ciphertext))
            .unwrap();
        let mut plaintext = Vec::new();
        reader.read_to_end(&mut plaintext).unwrap();
        assert_eq!(plaintext, MESSAGE);
    }

    #[test]
    fn test_truncated_media_key_blob() {
        let kek = Kek::from_bytes([9u8; 32]);
        let mut ciphertext = Vec::new();
        aenker().encrypt_with_kek(&kek, MESSAGE, &mut ciphertext).unwrap();

        let result = aenker().decrypt_with_kek(&kek, &ciphertext[..40], &mut Vec::new());
        assert!(matches!(result, Err(AenkerError::Truncated)));
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_header_and_media_key_events() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let key = [0x5Au8; 32];
        tracing::subscriber::with_default(subscriber, || {
            let mut ciphertext = Vec::new();
            aenker()
                .encrypt(&SealingKey::Symmetric(Kek::from_bytes(key)), MESSAGE, &mut ciphertext)
                .unwrap();
            aenker()
                .decrypt(&OpeningKey::Symmetric(Kek::from_bytes(key)), &ciphertext[..], &mut Vec::new())
                .unwrap();
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        for event in ["header written", "media key sealed", "header parsed", "media key opened"] {
            assert!(logs.contains(event), "missing {event:?} in:\n{logs}");
        }
        // no key bytes in any form
        assert!(!logs.contains("90, 90"), "key bytes leaked:\n{logs}");
        assert!(!logs.to_lowercase().contains("5a5a"), "key bytes leaked:\n{logs}");
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut ciphertext = Vec::new();
        let key = Kek::from_bytes([1u8; 32]);
        aenker().encrypt(&SealingKey::Symmetric(key.clone()), MESSAGE, &mut ciphertext).unwrap();
        ciphertext[3] ^= 0x20;

        let result = aenker().decrypt(&OpeningKey::Symmetric(key), &ciphertext[..], &mut Vec::new());
        assert!(matches!(result, Err(AenkerError::Format(_))));
    }
}

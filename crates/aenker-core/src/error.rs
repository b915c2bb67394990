use std::io;

use thiserror::Error;

pub type AenkerResult<T> = Result<T, AenkerError>;

#[derive(Debug, Error)]
pub enum AenkerError {
    /// Bad magic bytes, unknown chunk marker, or a structurally broken chunk.
    #[error("format error: {0}")]
    Format(String),

    /// AEAD tag mismatch. The payload names what failed to open.
    #[error("authentication failed: {0}")]
    Authentication(&'static str),

    /// The source ended before a chunk marked as final was read.
    #[error("truncated ciphertext")]
    Truncated,

    #[error("padding error: {0}")]
    Padding(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("key derivation error: {0}")]
    Kdf(String),

    /// A stream object was used after it finished or failed.
    #[error("invalid stream state: {0}")]
    InvalidState(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<AenkerError> for io::Error {
    fn from(err: AenkerError) -> Self {
        match err {
            AenkerError::Io(e) => e,
            AenkerError::Truncated => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            AenkerError::Format(_) | AenkerError::Authentication(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

pub mod config;
pub mod error;

pub use config::{validate_chunk_size, AenkerConfig, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use error::{AenkerError, AenkerResult};

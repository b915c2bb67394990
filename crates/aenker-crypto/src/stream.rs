//! Chunked stream engine
//!
//! Encrypt: read up to `chunk_size - 1` bytes, peek one byte to learn whether
//! this is the last chunk, pad, seal, write. Exactly one final chunk is
//! written, even for empty input.
//!
//! Decrypt: read exactly `chunk_size + tag` bytes, open, unpad. End of input
//! before a final chunk is [`AenkerError::Truncated`]. Bytes after the final
//! chunk are ignored and reported through [`StreamSummary::extra_data`].
//!
//! Both directions come in a pull form ([`encrypt_chunks`],
//! [`decrypt_chunks`]) and an adapter form ([`ChunkWriter`],
//! [`ChunkReader`]). The writer produces the same bytes as the pull form.

use std::io::{self, Read, Write};

use chacha20poly1305::ChaCha20Poly1305;
use tracing::{debug, warn};

use aenker_core::{AenkerError, AenkerResult};

use crate::chunk::{ChunkAead, ChunkOpener, ChunkSealer};
use crate::padding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Reading,
    Sealing,
    Opening,
    Finished,
    Errored,
}

/// What a finished stream did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub chunks: u64,
    /// Payload bytes, without padding.
    pub plaintext_bytes: u64,
    /// Sealed chunk bytes, without header or media key blob.
    pub ciphertext_bytes: u64,
    /// Bytes followed the final chunk and were ignored.
    pub extra_data: bool,
}

impl StreamSummary {
    fn record(&mut self, plaintext: usize, ciphertext: usize) {
        self.chunks += 1;
        self.plaintext_bytes += plaintext as u64;
        self.ciphertext_bytes += ciphertext as u64;
    }
}

/// A reader with a one-byte pushback slot, used to ask "is there more?"
/// without losing the byte.
pub struct Lookahead<R> {
    inner: R,
    peeked: Option<u8>,
}

impl<R: Read> Lookahead<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }

    /// True once the inner reader returns end of input. A byte read while
    /// probing is kept and handed out by the next read.
    pub fn is_exhausted(&mut self) -> io::Result<bool> {
        if self.peeked.is_some() {
            return Ok(false);
        }
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(true),
                Ok(_) => {
                    self.peeked = Some(byte[0]);
                    return Ok(false);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Fill `buf` as far as the input allows. Returns the number of bytes
    /// read, which is short only at end of input.
    pub fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Read for Lookahead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.peeked.take() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => self.inner.read(buf),
        }
    }
}

/// Encrypt everything `source` yields into `sink`.
///
/// The sealer is consumed: a chunk cipher serves exactly one stream.
pub fn encrypt_chunks<A, R, W>(
    mut sealer: ChunkSealer<A>,
    source: R,
    sink: &mut W,
) -> AenkerResult<StreamSummary>
where
    A: ChunkAead,
    R: Read,
    W: Write + ?Sized,
{
    let chunk_size = sealer.chunk_size();
    let mut source = Lookahead::new(source);
    let mut chunk = Vec::with_capacity(chunk_size);
    let mut summary = StreamSummary::default();

    loop {
        chunk.clear();
        chunk.resize(chunk_size - 1, 0);
        let n = source.read_full(&mut chunk)?;
        chunk.truncate(n);

        let final_chunk = source.is_exhausted()?;
        padding::add(&mut chunk, final_chunk, chunk_size)?;

        let sealed = sealer.seal(&chunk)?;
        sink.write_all(&sealed)?;
        summary.record(n, sealed.len());

        if final_chunk {
            break;
        }
    }
    sink.flush()?;

    debug!(
        chunks = summary.chunks,
        bytes = summary.plaintext_bytes,
        "stream encrypted"
    );
    Ok(summary)
}

/// Decrypt a chunk stream from `source` into `sink`.
///
/// Plaintext is written chunk by chunk as each one authenticates. On error,
/// whatever reached the sink must be discarded.
pub fn decrypt_chunks<A, R, W>(
    opener: ChunkOpener<A>,
    source: R,
    sink: &mut W,
) -> AenkerResult<StreamSummary>
where
    A: ChunkAead,
    R: Read,
    W: Write + ?Sized,
{
    let mut reader = ChunkReader::new(opener, source);
    loop {
        let plaintext = reader.open_next()?;
        sink.write_all(plaintext)?;
        if reader.state() == StreamState::Finished {
            break;
        }
    }
    sink.flush()?;

    let summary = reader.summary();
    debug!(
        chunks = summary.chunks,
        bytes = summary.plaintext_bytes,
        "stream decrypted"
    );
    Ok(summary)
}

/// Push-style encryptor: buffers writes into chunks and seals them as they
/// fill. Call [`ChunkWriter::finish`] to seal the final chunk; dropping the
/// writer without it leaves a truncated stream.
pub struct ChunkWriter<W, A = ChaCha20Poly1305> {
    sealer: ChunkSealer<A>,
    sink: W,
    buffer: Vec<u8>,
    state: StreamState,
    summary: StreamSummary,
}

impl<W: Write, A: ChunkAead> ChunkWriter<W, A> {
    pub fn new(sealer: ChunkSealer<A>, sink: W) -> Self {
        let chunk_size = sealer.chunk_size();
        Self {
            sealer,
            sink,
            buffer: Vec::with_capacity(chunk_size),
            state: StreamState::Reading,
            summary: StreamSummary::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn summary(&self) -> StreamSummary {
        self.summary
    }

    /// Unwrap the sink. Only a finished writer has produced a complete
    /// stream.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn check_usable(&self) -> AenkerResult<()> {
        match self.state {
            StreamState::Finished => Err(AenkerError::InvalidState("stream writer already finished")),
            StreamState::Errored => Err(AenkerError::InvalidState("stream writer failed earlier")),
            _ => Ok(()),
        }
    }

    fn data_capacity(&self) -> usize {
        self.sealer.chunk_size() - 1
    }

    fn seal_buffered(&mut self, final_chunk: bool) -> AenkerResult<()> {
        self.state = StreamState::Sealing;
        let data_len = self.buffer.len();
        padding::add(&mut self.buffer, final_chunk, self.sealer.chunk_size())?;
        let sealed = self.sealer.seal(&self.buffer)?;
        self.buffer.clear();
        self.sink.write_all(&sealed)?;
        self.summary.record(data_len, sealed.len());
        self.state = StreamState::Reading;
        Ok(())
    }

    /// Buffer `data`, sealing running chunks as needed.
    ///
    /// A full buffer is only sealed once more data arrives, because until
    /// then it may still turn out to be the final chunk.
    pub fn write_plaintext(&mut self, data: &[u8]) -> AenkerResult<()> {
        self.check_usable()?;
        let capacity = self.data_capacity();
        let mut rest = data;
        while !rest.is_empty() {
            if self.buffer.len() == capacity {
                if let Err(e) = self.seal_buffered(false) {
                    self.state = StreamState::Errored;
                    return Err(e);
                }
            }
            let take = (capacity - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        Ok(())
    }

    /// Seal whatever is buffered as the final chunk and flush the sink.
    pub fn finish(&mut self) -> AenkerResult<StreamSummary> {
        self.check_usable()?;
        let sealed = self
            .seal_buffered(true)
            .and_then(|()| self.sink.flush().map_err(AenkerError::from));
        match sealed {
            Ok(()) => {
                self.state = StreamState::Finished;
                debug!(
                    chunks = self.summary.chunks,
                    bytes = self.summary.plaintext_bytes,
                    "stream writer finished"
                );
                Ok(self.summary)
            }
            Err(e) => {
                self.state = StreamState::Errored;
                Err(e)
            }
        }
    }
}

impl<W: Write, A: ChunkAead> Write for ChunkWriter<W, A> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_plaintext(buf)?;
        Ok(buf.len())
    }

    /// Flushes the sink only. Buffered plaintext stays buffered, since a
    /// partial chunk can only be sealed as the final one.
    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Pull-style decryptor. Hands out only authenticated plaintext.
pub struct ChunkReader<R, A = ChaCha20Poly1305> {
    opener: ChunkOpener<A>,
    source: Lookahead<R>,
    sealed: Vec<u8>,
    plaintext: Vec<u8>,
    pos: usize,
    state: StreamState,
    summary: StreamSummary,
}

impl<R: Read, A: ChunkAead> ChunkReader<R, A> {
    pub fn new(opener: ChunkOpener<A>, source: R) -> Self {
        let sealed_size = opener.sealed_size();
        Self {
            opener,
            source: Lookahead::new(source),
            sealed: vec![0u8; sealed_size],
            plaintext: Vec::new(),
            pos: 0,
            state: StreamState::Reading,
            summary: StreamSummary::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn summary(&self) -> StreamSummary {
        self.summary
    }

    /// Read, authenticate and unpad the next chunk.
    ///
    /// After the final chunk the state is [`StreamState::Finished`] and
    /// further calls fail with [`AenkerError::InvalidState`].
    pub fn open_next(&mut self) -> AenkerResult<&[u8]> {
        match self.state {
            StreamState::Finished => {
                return Err(AenkerError::InvalidState("stream reader already finished"))
            }
            StreamState::Errored => {
                return Err(AenkerError::InvalidState("stream reader failed earlier"))
            }
            _ => {}
        }
        match self.open_chunk() {
            Ok(()) => Ok(&self.plaintext[self.pos..]),
            Err(e) => {
                self.state = StreamState::Errored;
                Err(e)
            }
        }
    }

    fn open_chunk(&mut self) -> AenkerResult<()> {
        self.state = StreamState::Reading;
        self.plaintext.clear();
        self.pos = 0;

        let n = self.source.read_full(&mut self.sealed)?;
        if n < self.sealed.len() {
            debug!(
                read = n,
                expected = self.sealed.len(),
                chunk = self.summary.chunks,
                "input ended before the final chunk"
            );
            return Err(AenkerError::Truncated);
        }

        self.state = StreamState::Opening;
        let mut plaintext = self.opener.open(&self.sealed)?;
        let final_chunk = padding::remove(&mut plaintext)?;
        self.summary.record(plaintext.len(), self.sealed.len());
        self.plaintext = plaintext;

        if final_chunk {
            if !self.source.is_exhausted()? {
                self.summary.extra_data = true;
                warn!(
                    chunks = self.summary.chunks,
                    "extra data after the final chunk was ignored"
                );
            }
            self.state = StreamState::Finished;
        } else {
            self.state = StreamState::Reading;
        }
        Ok(())
    }
}

impl<R: Read, A: ChunkAead> Read for ChunkReader<R, A> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.plaintext.len() {
            if self.state == StreamState::Finished {
                return Ok(0);
            }
            self.open_next()?;
        }
        let n = (self.plaintext.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.plaintext[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

//! Per-chunk padding with a trailing marker byte
//!
//! Every plaintext chunk ends in one marker byte:
//! ```text
//! 0x00  running   more chunks follow, no filler
//! 0x01  unpadded  final chunk, data filled the chunk exactly
//! 0x02  padded    final chunk, filler bytes precede the marker
//! ```
//! Filler is 0x00, or 0x01 when the last data byte is 0x00, so scanning
//! backwards from the marker always stops at the final data byte.
//! See https://rwc.iacr.org/2018/Slides/Hansen.pdf, page 10.

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

use aenker_core::{AenkerError, AenkerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkKind {
    Running = 0x00,
    Unpadded = 0x01,
    Padded = 0x02,
}

impl TryFrom<u8> for ChunkKind {
    type Error = AenkerError;

    fn try_from(marker: u8) -> AenkerResult<Self> {
        match marker {
            0x00 => Ok(Self::Running),
            0x01 => Ok(Self::Unpadded),
            0x02 => Ok(Self::Padded),
            other => Err(AenkerError::Format(format!(
                "unknown chunk marker 0x{other:02x}"
            ))),
        }
    }
}

/// Pad `chunk` up to exactly `capacity` bytes.
///
/// A running chunk must have exactly one free byte left for its marker. A
/// final chunk needs at least one.
pub fn add(chunk: &mut Vec<u8>, final_chunk: bool, capacity: usize) -> AenkerResult<()> {
    let free = capacity.saturating_sub(chunk.len());

    if !final_chunk {
        if free != 1 {
            return Err(AenkerError::Padding(format!(
                "running chunk must have exactly one free byte, has {free}"
            )));
        }
        chunk.push(ChunkKind::Running as u8);
        return Ok(());
    }

    if free < 1 {
        return Err(AenkerError::Padding(format!(
            "final chunk of {} bytes leaves no room in capacity {capacity}",
            chunk.len()
        )));
    }

    let pad = match chunk.last() {
        Some(&last) if last != 0x00 => 0x00,
        _ => 0x01,
    };
    chunk.resize(capacity - 1, pad);

    let kind = if free > 1 {
        ChunkKind::Padded
    } else {
        ChunkKind::Unpadded
    };
    chunk.push(kind as u8);
    Ok(())
}

/// Strip the marker and any filler from `chunk`. Returns whether this was
/// the final chunk of its stream.
///
/// For final chunks the filler scan touches every byte and selects without
/// branching on the data, so the amount of padding does not show up in the
/// timing of the loop. This is best-effort only.
pub fn remove(chunk: &mut Vec<u8>) -> AenkerResult<bool> {
    let marker = chunk
        .pop()
        .ok_or_else(|| AenkerError::Format("empty chunk has no marker byte".into()))?;
    let kind = ChunkKind::try_from(marker)?;

    if kind == ChunkKind::Running {
        return Ok(false);
    }

    let pad = match chunk.last() {
        Some(&pad) => pad,
        None if kind == ChunkKind::Padded => {
            return Err(AenkerError::Format("padded chunk carries no padding".into()))
        }
        None => return Ok(true),
    };

    // Cleared for unpadded chunks: the scan still runs but counts nothing.
    let mut check: Choice = marker.ct_eq(&(ChunkKind::Padded as u8));
    let mut strip = 0u64;
    for &cur in chunk.iter().rev() {
        let matches = cur.ct_eq(&pad) & check;
        strip = u64::conditional_select(&strip, &(strip + 1), matches);
        check = matches;
    }

    let data_len = chunk.len() - strip as usize;
    chunk.truncate(data_len);
    Ok(true)
}

//! Length and checksum framing for the append-only logs.
//!
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload]
//! ```
//!
//! Readers only ever look below the committed length recorded in the
//! header, so a frame that overruns it is structural damage, not a torn
//! write.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{StoreError, StoreResult};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const FRAME_HEADER_SIZE: u64 = 8;

/// Frame a payload. Returns the complete frame bytes.
pub fn encode(payload: &[u8]) -> StoreResult<Vec<u8>> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        StoreError::Serialization(format!("frame payload of {} bytes is too large", payload.len()))
    })?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write one framed payload and return the number of bytes written.
pub fn write<W: Write>(writer: &mut W, payload: &[u8]) -> StoreResult<u64> {
    let frame = encode(payload)?;
    writer.write_all(&frame)?;
    Ok(frame.len() as u64)
}

fn read_header<R: Read>(reader: &mut R) -> StoreResult<(u32, u32)> {
    let mut buf = [0u8; FRAME_HEADER_SIZE as usize];
    reader.read_exact(&mut buf)?;
    let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Ok((length, crc))
}

/// Read and checksum the frame starting at `offset`.
pub fn read_at<R: Read + Seek>(reader: &mut R, offset: u64) -> StoreResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let (length, expected_crc) = read_header(reader)?;
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;

    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(StoreError::CorruptRecord {
            index: None,
            reason: format!(
                "checksum mismatch at offset {offset}: \
                 expected {expected_crc:08x}, found {actual_crc:08x}"
            ),
        });
    }
    Ok(payload)
}

/// Walk frame headers in `[0, limit)` and return each frame's offset.
///
/// Payloads are skipped, not read; checksums are checked when a frame is
/// actually read.
pub fn offsets<R: Read + Seek>(reader: &mut R, limit: u64) -> StoreResult<Vec<u64>> {
    let mut offsets = Vec::new();
    let mut offset = 0u64;
    while offset < limit {
        if offset + FRAME_HEADER_SIZE > limit {
            return Err(overrun(offset, limit));
        }
        reader.seek(SeekFrom::Start(offset))?;
        let (length, _) = read_header(reader)?;
        let next = offset + FRAME_HEADER_SIZE + u64::from(length);
        if length == 0 || next > limit {
            return Err(overrun(offset, limit));
        }
        offsets.push(offset);
        offset = next;
    }
    Ok(offsets)
}

fn overrun(offset: u64, limit: u64) -> StoreError {
    StoreError::CorruptRecord {
        index: None,
        reason: format!("frame at offset {offset} overruns committed length {limit}"),
    }
}

//! Journal frame encoding.

use crate::error::{CoreError, CoreResult};
use crate::journal::entry::JournalEntry;

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"KSJ1";

/// magic (4) + length (4)
const HEADER_SIZE: usize = 8;

const CRC_SIZE: usize = 4;

/// Encodes an entry as `| magic | length | cbor payload | crc32 |`.
///
/// The checksum covers the header and the payload.
pub(crate) fn encode_frame(entry: &JournalEntry) -> CoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(entry, &mut payload).map_err(|e| CoreError::codec(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::codec(format!("journal entry too large: {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// The outcome of decoding a whole journal.
#[derive(Debug)]
pub(crate) struct DecodedLog {
    /// Entries of every complete frame, in order.
    pub entries: Vec<JournalEntry>,
    /// Length of the prefix made of complete frames.
    pub valid_len: u64,
}

impl DecodedLog {
    pub fn has_torn_tail(&self, total_len: usize) -> bool {
        self.valid_len < total_len as u64
    }
}

/// Decodes every frame in `data`.
///
/// A trailing frame cut short by a crash ends the log cleanly. A bad magic,
/// a checksum mismatch or an undecodable payload is fatal.
pub(crate) fn decode_log(data: &[u8]) -> CoreResult<DecodedLog> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = &data[offset..];
        if remaining.len() < HEADER_SIZE {
            break;
        }
        if remaining[..4] != FRAME_MAGIC {
            return Err(CoreError::corrupted(offset as u64, "bad frame magic"));
        }
        let len = u32::from_le_bytes([remaining[4], remaining[5], remaining[6], remaining[7]])
            as usize;
        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        if remaining.len() < frame_len {
            break;
        }

        let body = &remaining[..HEADER_SIZE + len];
        let stored = &remaining[HEADER_SIZE + len..frame_len];
        let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let actual = compute_crc32(body);
        if stored != actual {
            return Err(CoreError::corrupted(
                offset as u64,
                format!("checksum mismatch: expected {stored:08x}, got {actual:08x}"),
            ));
        }

        let entry: JournalEntry = ciborium::from_reader(&body[HEADER_SIZE..])
            .map_err(|e| CoreError::corrupted(offset as u64, format!("undecodable frame: {e}")))?;
        entries.push(entry);
        offset += frame_len;
    }

    Ok(DecodedLog {
        entries,
        valid_len: offset as u64,
    })
}

/// Computes a CRC32 checksum (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

use crate::core::error::{Error, Result};
use crate::core::types::Tick;

/// Markers are aligned to this boundary inside a datafile.
pub const MARKER_ALIGNMENT: usize = 8;

/// Fixed on-disk marker header:
/// `kind:u8 | pad:[u8;3] | size:u32 | tick:u64 | crc:u32 | payload_len:u32`
/// followed by the payload and zero padding up to `size`. The CRC is
/// computed over the whole marker with the CRC field zeroed.
pub const MARKER_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarkerKind {
    /// First marker of every datafile.
    Header = 1,
    /// Last marker of a sealed datafile.
    Footer = 2,
    /// Collection id and type, directly after the header.
    ColHeader = 3,
    /// Optional region separator preceding data.
    Prologue = 4,
    /// A document (or edge) version.
    VpackDocument = 5,
    /// A document removal.
    VpackRemove = 6,
    /// An index creation record.
    VpackCreateIndex = 7,
    /// An index drop record.
    VpackDropIndex = 8,
}

impl MarkerKind {
    pub fn from_u8(value: u8) -> Option<MarkerKind> {
        match value {
            1 => Some(MarkerKind::Header),
            2 => Some(MarkerKind::Footer),
            3 => Some(MarkerKind::ColHeader),
            4 => Some(MarkerKind::Prologue),
            5 => Some(MarkerKind::VpackDocument),
            6 => Some(MarkerKind::VpackRemove),
            7 => Some(MarkerKind::VpackCreateIndex),
            8 => Some(MarkerKind::VpackDropIndex),
            _ => None,
        }
    }

    /// Structural markers do not contribute to the collection's `tick_max`.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            MarkerKind::Header | MarkerKind::Footer | MarkerKind::ColHeader | MarkerKind::Prologue
        )
    }
}

/// Round `len` up to the marker alignment.
pub fn aligned_size(len: usize) -> usize {
    (len + MARKER_ALIGNMENT - 1) & !(MARKER_ALIGNMENT - 1)
}

/// A single unit of append-only storage. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub tick: Tick,
    pub payload: Vec<u8>,
}

impl Marker {
    pub fn new(kind: MarkerKind, tick: Tick, payload: Vec<u8>) -> Marker {
        Marker {
            kind,
            tick,
            payload,
        }
    }

    /// Total on-disk size including header and alignment padding.
    pub fn total_size(&self) -> usize {
        aligned_size(MARKER_HEADER_SIZE + self.payload.len())
    }

    pub fn encode(&self) -> Vec<u8> {
        let total = self.total_size();
        let mut buf = vec![0u8; total];
        buf[0] = self.kind as u8;
        buf[4..8].copy_from_slice(&(total as u32).to_le_bytes());
        buf[8..16].copy_from_slice(&self.tick.0.to_le_bytes());
        buf[20..24].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf[MARKER_HEADER_SIZE..MARKER_HEADER_SIZE + self.payload.len()]
            .copy_from_slice(&self.payload);

        // CRC field is still zero at this point, as required.
        let crc = crc32fast::hash(&buf);
        buf[16..20].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode one marker from the start of `bytes`. Returns the marker and
    /// the number of bytes it occupies.
    pub fn decode(bytes: &[u8]) -> Result<(Marker, usize)> {
        if bytes.len() < MARKER_HEADER_SIZE {
            return Err(Error::CorruptDatafile("truncated marker header".into()));
        }

        let kind = MarkerKind::from_u8(bytes[0])
            .ok_or_else(|| Error::CorruptDatafile(format!("unknown marker kind {}", bytes[0])))?;

        let size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        if size < MARKER_HEADER_SIZE || size % MARKER_ALIGNMENT != 0 {
            return Err(Error::CorruptDatafile(format!(
                "invalid marker size {size}"
            )));
        }
        if size > bytes.len() {
            return Err(Error::CorruptDatafile("truncated marker body".into()));
        }

        let tick = Tick(u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]));
        let stored_crc = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let payload_len =
            u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]) as usize;
        if MARKER_HEADER_SIZE + payload_len > size {
            return Err(Error::CorruptDatafile("payload exceeds marker size".into()));
        }

        // Recompute over the marker with the CRC field zeroed.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..16]);
        hasher.update(&[0u8; 4]);
        hasher.update(&bytes[20..size]);
        let actual = hasher.finalize();
        if actual != stored_crc {
            return Err(Error::CorruptDatafile(format!(
                "crc mismatch: stored {stored_crc:#x}, computed {actual:#x}"
            )));
        }

        let payload = bytes[MARKER_HEADER_SIZE..MARKER_HEADER_SIZE + payload_len].to_vec();
        Ok((
            Marker {
                kind,
                tick,
                payload,
            },
            size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_aligned() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 8);
        assert_eq!(aligned_size(24), 24);
        assert_eq!(aligned_size(25), 32);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let marker = Marker::new(MarkerKind::VpackDocument, Tick(42), b"{\"x\":1}".to_vec());
        let bytes = marker.encode();
        assert_eq!(bytes.len(), marker.total_size());
        assert_eq!(bytes.len() % MARKER_ALIGNMENT, 0);

        let (decoded, consumed) = Marker::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, marker);
    }

    #[test]
    fn corrupt_payload_fails_crc() {
        let marker = Marker::new(MarkerKind::VpackDocument, Tick(7), b"payload".to_vec());
        let mut bytes = marker.encode();
        bytes[MARKER_HEADER_SIZE] ^= 0xff;
        assert!(matches!(
            Marker::decode(&bytes),
            Err(Error::CorruptDatafile(_))
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let marker = Marker::new(MarkerKind::Footer, Tick(1), Vec::new());
        let mut bytes = marker.encode();
        bytes[0] = 99;
        assert!(matches!(
            Marker::decode(&bytes),
            Err(Error::CorruptDatafile(_))
        ));
    }
}

//! Sample writers and the record file format
//!
//! This module provides ready-made write callbacks for a `SaveSession` and
//! the on-disk framing they use:
//!
//! - `TextWriter` writes tab-delimited plain text, one file per callback
//! - `RecordFileWriter` writes framed binary records, one per sample, each
//!   guarded by a marker and a CRC32 of its payload
//! - `RecordFile` maps a record file into memory and verifies every record
//!   as it is read back
//!
//! A record is a `RecordHeader` followed by `size` payload bytes holding the
//! sample as JSON. All header fields are little-endian.

pub mod reader;
pub mod writer;

use crc32fast::Hasher;

/// Header written in front of every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// A marker indicating a valid record (0xAA55)
    pub marker: u16,
    /// Format version
    pub version: u16,
    /// Size of the record payload in bytes
    pub size: u32,
    /// CRC32 of the record payload
    pub crc32: u32,
    /// Position of the sample within the file
    pub index: u32,
    /// Timestamp in microseconds since epoch
    pub timestamp_us: u64,
}

impl RecordHeader {
    /// Size of the encoded header in bytes
    pub const SIZE: usize = 24;

    /// Marker value for valid records
    pub const MARKER: u16 = 0xAA55;

    /// Current record format version
    pub const VERSION: u16 = 1;

    /// Create a header for a payload of `size` bytes
    ///
    /// The CRC is filled in by `update_crc` once the payload is known.
    pub fn new(size: u32, index: u32, timestamp_us: u64) -> Self {
        Self {
            marker: Self::MARKER,
            version: Self::VERSION,
            size,
            crc32: 0,
            index,
            timestamp_us,
        }
    }

    /// Calculate CRC32 for the given data and update the header
    pub fn update_crc(&mut self, data: &[u8]) {
        self.crc32 = checksum(data);
    }

    /// Verify the CRC32 of the given data against the stored CRC
    pub fn verify_crc(&self, data: &[u8]) -> bool {
        self.crc32 == checksum(data)
    }

    /// Check if this header represents a valid record
    pub fn is_valid(&self) -> bool {
        self.marker == Self::MARKER && self.version == Self::VERSION
    }

    /// Encode as little-endian bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.marker.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.crc32.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.index.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.timestamp_us.to_le_bytes());
        bytes
    }

    /// Decode from the start of `bytes`, `None` if too short
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[16..24]);

        Some(Self {
            marker: u16_at(0),
            version: u16_at(2),
            size: u32_at(4),
            crc32: u32_at(8),
            index: u32_at(12),
            timestamp_us: u64::from_le_bytes(timestamp),
        })
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

//! Memory-mapped reader for record files

use crate::disk::RecordHeader;
use crate::error::{Error, Result};
use memmap2::{Mmap, MmapOptions};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::{Path, PathBuf};

/// One verified record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// The record header
    pub header: RecordHeader,
    /// The raw payload
    pub payload: Vec<u8>,
}

impl StoredRecord {
    /// Deserialize the payload back into a sample
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Read-only view of a record file
pub struct RecordFile {
    path: PathBuf,
    /// `None` for an empty file, which cannot be mapped
    mmap: Option<Mmap>,
}

impl RecordFile {
    /// Open and map the file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();

        let mmap = if len == 0 {
            None
        } else {
            // The file is only read through this map while the writer is done with it
            Some(unsafe { MmapOptions::new().map(&file)? })
        };

        Ok(Self { path, mmap })
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file in bytes
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Whether the file holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or_default()
    }

    /// Read the record starting at `offset`
    ///
    /// Returns the record and the offset of the next one, or `None` at the end
    /// of the file. A bad marker, a truncated payload or a checksum mismatch is
    /// reported as `CorruptRecord`.
    pub fn read_at(&self, offset: usize) -> Result<Option<(StoredRecord, usize)>> {
        let bytes = self.bytes();
        if offset >= bytes.len() {
            return Ok(None);
        }

        let header = RecordHeader::from_bytes(&bytes[offset..])
            .filter(RecordHeader::is_valid)
            .ok_or(Error::CorruptRecord { offset })?;

        let data_pos = offset + RecordHeader::SIZE;
        let data_end = data_pos + header.size as usize;
        let payload = bytes
            .get(data_pos..data_end)
            .ok_or(Error::CorruptRecord { offset })?;

        if !header.verify_crc(payload) {
            return Err(Error::CorruptRecord { offset });
        }

        let record = StoredRecord {
            header,
            payload: payload.to_vec(),
        };
        Ok(Some((record, data_end)))
    }

    /// Read and verify every record in file order
    pub fn records(&self) -> Result<Vec<StoredRecord>> {
        let mut records = Vec::new();
        let mut offset = 0;
        while let Some((record, next)) = self.read_at(offset)? {
            records.push(record);
            offset = next;
        }
        Ok(records)
    }

    /// Read, verify and deserialize every record
    pub fn samples<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.records()?.iter().map(|record| record.decode()).collect()
    }
}

impl std::fmt::Debug for RecordFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFile")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

//! Record layout of a quote table.
//!
//! ```text
//! [0:4)                      count, little-endian u32
//! [4 + i*16 : 4 + i*16 + 8)  record i key, little-endian u64
//! [4 + i*16 + 8 : 4 + i*16 + 16) record i price, little-endian u64
//! ```
//!
//! This is the only module that computes byte offsets.

use crate::errors::Result;
use crate::region::SharedRegion;
use crate::ticker::TickerKey;

pub const HEADER_SIZE: usize = 4;
pub const KEY_SIZE: usize = 8;
pub const PRICE_SIZE: usize = 8;
pub const RECORD_SIZE: usize = KEY_SIZE + PRICE_SIZE;

/// Bytes needed for a table of `capacity` records.
#[inline]
pub fn region_size(capacity: u32) -> usize {
    HEADER_SIZE + capacity as usize * RECORD_SIZE
}

#[inline]
pub fn record_offset(index: u32) -> usize {
    HEADER_SIZE + index as usize * RECORD_SIZE
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: TickerKey,
    pub price: u64,
}

impl Record {
    fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[0..KEY_SIZE].copy_from_slice(&self.key.0.to_le_bytes());
        bytes[KEY_SIZE..RECORD_SIZE].copy_from_slice(&self.price.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Record {
        Record {
            key: TickerKey(read_u64(&bytes[0..KEY_SIZE])),
            price: read_u64(&bytes[KEY_SIZE..RECORD_SIZE]),
        }
    }
}

#[inline]
fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

/// Typed access to the count and records stored in a region.
///
/// Reads past the end of the region come back zero-filled rather than
/// faulting, mirroring the clamped region accessors.
pub struct RecordArray {
    region: SharedRegion,
}

impl RecordArray {
    pub fn new(region: SharedRegion) -> RecordArray {
        RecordArray { region }
    }

    #[inline]
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Number of records the region was sized for.
    pub fn capacity(&self) -> u32 {
        ((self.region.capacity().saturating_sub(HEADER_SIZE)) / RECORD_SIZE) as u32
    }

    pub fn len(&self) -> Result<u32> {
        let mut bytes = [0u8; HEADER_SIZE];
        self.region.read_at(&mut bytes, 0)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn set_len(&mut self, len: u32) -> Result<()> {
        self.region.write_at(&len.to_le_bytes(), 0)?;
        Ok(())
    }

    /// Key of record `index`, read in place.
    pub fn key(&self, index: u32) -> Result<TickerKey> {
        let offset = record_offset(index);
        let bytes = self.region.byte_slice(offset, offset + KEY_SIZE)?;
        Ok(TickerKey(read_u64(bytes)))
    }

    pub fn record(&self, index: u32) -> Result<Record> {
        let offset = record_offset(index);
        let mut bytes = [0u8; RECORD_SIZE];
        self.region.read_at(&mut bytes, offset)?;
        Ok(Record::from_bytes(&bytes))
    }

    pub fn set_record(&mut self, index: u32, key: TickerKey, price: u64) -> Result<()> {
        let bytes = Record { key, price }.to_bytes();
        self.region.write_at(&bytes, record_offset(index))?;
        Ok(())
    }

    /// Overwrites the price of record `index`, leaving its key alone.
    pub fn set_price(&mut self, index: u32, price: u64) -> Result<()> {
        self.region
            .write_at(&price.to_le_bytes(), record_offset(index) + KEY_SIZE)?;
        Ok(())
    }

    /// Moves records `[first, old_len)` one slot to the right.
    ///
    /// The source range is copied out in full before anything is written,
    /// since source and destination overlap.
    pub fn shift_right(&mut self, first: u32, old_len: u32) -> Result<()> {
        if first >= old_len {
            return Ok(());
        }
        let start = record_offset(first);
        let mut moved = vec![0u8; record_offset(old_len) - start];
        self.region.read_at(&mut moved, start)?;
        self.region.write_at(&moved, record_offset(first + 1))?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.region.close()
    }
}

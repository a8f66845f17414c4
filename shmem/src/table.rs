//! Sorted quote table stored in shared memory.
//!
//! Records are kept sorted by [`TickerKey`] so lookups are a binary search
//! over the mapped bytes. Nothing is buffered in process memory: every
//! operation reads and writes the region directly, and changes made by one
//! process are visible to every other process mapping the same name.
//!
//! # Concurrency
//!
//! The table has no internal locking. [`put`](QuoteTable::put) is not safe for
//! concurrent use by several writers without external synchronisation:
//! interleaved count updates and shifts can break the ordering or lose an
//! entry. Either keep a single writing process, or wrap writers in a
//! cross-process lock such as [`WriterLock`](crate::lock::WriterLock).
//! Readers racing a writer may see a stale or half-written record.

use std::fmt;
use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::errors::{CacheError, Result};
use crate::records::{region_size, Record, RecordArray};
use crate::region::SharedRegion;
use crate::ticker::{KeyHasher, TickerKey, XxKeyHasher};

pub struct QuoteTable<H: KeyHasher = XxKeyHasher> {
    records: RecordArray,
    _hasher: PhantomData<H>,
}

impl QuoteTable {
    /// Attaches to the table `name`, creating it if no process has yet.
    ///
    /// An attached table keeps whatever the earlier processes stored; call
    /// [`clear`](Self::clear) to start empty.
    pub fn create(name: &str, capacity: u32) -> Result<QuoteTable> {
        Self::create_with_hasher(name, capacity)
    }

    /// Attaches to an existing table only.
    pub fn open(name: &str, capacity: u32) -> Result<QuoteTable> {
        Self::open_with_hasher(name, capacity)
    }

    /// Allocates a fresh table, failing if the name is taken.
    pub fn create_new(name: &str, capacity: u32) -> Result<QuoteTable> {
        Self::create_new_with_hasher(name, capacity)
    }

    pub fn from_config(cfg: &CacheConfig) -> Result<QuoteTable> {
        Self::create(&cfg.name, cfg.capacity)
    }
}

impl<H: KeyHasher> QuoteTable<H> {
    pub fn create_with_hasher(name: &str, capacity: u32) -> Result<QuoteTable<H>> {
        match Self::open_with_hasher(name, capacity) {
            Err(CacheError::NotFound(_)) => {}
            other => return other,
        }
        match Self::create_new_with_hasher(name, capacity) {
            // Another process won the race between our open and create.
            Err(CacheError::AlreadyExists(_)) => Self::open_with_hasher(name, capacity),
            other => other,
        }
    }

    pub fn open_with_hasher(name: &str, capacity: u32) -> Result<QuoteTable<H>> {
        let region = SharedRegion::open(name, region_size(capacity))?;
        Ok(Self::with_region(region))
    }

    pub fn create_new_with_hasher(name: &str, capacity: u32) -> Result<QuoteTable<H>> {
        let region = SharedRegion::create(name, region_size(capacity))?;
        Ok(Self::with_region(region))
    }

    fn with_region(region: SharedRegion) -> QuoteTable<H> {
        let records = RecordArray::new(region);
        debug!(
            "quote table {} ready (capacity {}, creator: {})",
            records.region().name(),
            records.capacity(),
            records.region().is_creator()
        );
        QuoteTable {
            records,
            _hasher: PhantomData,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.records.region().name()
    }

    /// Maximum number of quotes the table holds.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.records.capacity()
    }

    #[inline]
    pub fn is_creator(&self) -> bool {
        self.records.region().is_creator()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.records.region().is_closed()
    }

    /// Number of live records, as stored in the shared count field.
    pub fn len(&self) -> Result<u32> {
        self.records.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Count clamped to the capacity, so a corrupted header never sends a
    /// search past the records.
    fn live_len(&self) -> Result<u32> {
        let len = self.records.len()?;
        let capacity = self.capacity();
        if len > capacity {
            warn!(
                "quote table {} count {} exceeds capacity {}",
                self.name(),
                len,
                capacity
            );
            return Ok(capacity);
        }
        Ok(len)
    }

    /// Forgets every record. Record bytes stay until overwritten.
    pub fn clear(&mut self) -> Result<()> {
        self.records.set_len(0)
    }

    /// Stores `price` for `ticker`, replacing any previous price.
    ///
    /// Returns `false`, leaving the table untouched, when the ticker is new
    /// and the table is full.
    pub fn put(&mut self, ticker: &str, price: u64) -> Result<bool> {
        self.put_key(TickerKey::with_hasher::<H>(ticker), price)
    }

    pub fn put_key(&mut self, key: TickerKey, price: u64) -> Result<bool> {
        let (first, last) = self.search(key)?;
        if first == last {
            self.records.set_price(first, price)?;
            return Ok(true);
        }

        let len = self.live_len()?;
        if len >= self.capacity() {
            return Ok(false);
        }
        self.records.set_len(len + 1)?;
        self.records.shift_right(first, len)?;
        self.records.set_record(first, key, price)?;
        Ok(true)
    }

    /// Price stored for `ticker`, in any casing.
    pub fn get(&self, ticker: &str) -> Result<Option<u64>> {
        self.get_key(TickerKey::with_hasher::<H>(ticker))
    }

    pub fn get_key(&self, key: TickerKey) -> Result<Option<u64>> {
        let (first, last) = self.search(key)?;
        if first == last {
            Ok(Some(self.records.record(first)?.price))
        } else {
            Ok(None)
        }
    }

    /// Binary search for `key`.
    ///
    /// Returns `(i, i)` when record `i` holds the key, and `(i, i + 1)` when
    /// the key is absent and belongs at index `i`.
    fn search(&self, key: TickerKey) -> Result<(u32, u32)> {
        let mut first = 0;
        let mut last = self.live_len()?;
        while first < last {
            let middle = (first + last) / 2;
            let middle_key = self.records.key(middle)?;
            if key == middle_key {
                return Ok((middle, middle));
            } else if key < middle_key {
                last = middle;
            } else {
                first = middle + 1;
            }
        }
        Ok((first, first + 1))
    }

    /// Snapshot of the live records in key order.
    pub fn entries(&self) -> Result<Vec<Record>> {
        (0..self.live_len()?)
            .map(|index| self.records.record(index))
            .collect()
    }

    /// Releases the mapping; the creator also destroys the segment.
    pub fn close(&mut self) -> Result<()> {
        self.records.close()
    }
}

impl<H: KeyHasher> fmt::Display for QuoteTable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = match self.entries() {
            Ok(v) => v,
            Err(e) => return write!(f, "[{}]", e),
        };
        write!(f, "[")?;
        for (i, record) in entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} -> {}", record.key, record.price)?;
        }
        write!(f, "]")
    }
}

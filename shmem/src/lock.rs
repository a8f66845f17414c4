//! Optional cross-process lock for table writers.
//!
//! The lock lives in its own segment named `<table>.lock`, so tables written
//! with and without it share the same byte layout:
//!
//! ```text
//! [0:8)       ready word, set once the mutex is initialised
//! [8:8 + m)   process-shared mutex
//! [8 + m:..)  mutex data word
//! ```
//!
//! The segment is not tied to any one writer. Closing a handle, including the
//! one that initialised the mutex, leaves it in place so later writers keep
//! excluding the ones still running. [`WriterLock::remove`] deletes it.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use raw_sync::locks::{LockImpl, LockInit, Mutex};
use raw_sync::Timeout;
use tracing::debug;

use crate::errors::{lock_error, CacheError, Result};
use crate::region::{os_name, unlink, SharedRegion};

const READY: u64 = 0x4c4f_434b_5245_4459;
const READY_SIZE: usize = mem::size_of::<u64>();
const READY_WAIT_ATTEMPTS: u32 = 1000;
const READY_WAIT_INTERVAL: Duration = Duration::from_millis(1);

pub struct WriterLock {
    // Must drop before the region it points into.
    lock: Option<Box<dyn LockImpl>>,
    region: SharedRegion,
    creator: bool,
}

pub fn lock_name(table_name: &str) -> String {
    format!("{}.lock", os_name(table_name))
}

#[inline]
fn lock_region_size() -> usize {
    READY_SIZE + Mutex::size_of(None) + mem::size_of::<u64>()
}

/// The ready word at the start of the lock segment.
///
/// # Safety
/// `base` must point to a live, 8-byte aligned lock segment.
#[inline]
unsafe fn ready_word<'a>(base: *mut u8) -> &'a AtomicU64 {
    &*(base as *const AtomicU64)
}

impl WriterLock {
    /// Attaches to the writer lock of `table_name`, creating it if needed.
    pub fn open_or_create(table_name: &str) -> Result<WriterLock> {
        let name = lock_name(table_name);
        match SharedRegion::open(&name, lock_region_size()) {
            Ok(region) => return WriterLock::attach(region),
            Err(CacheError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match SharedRegion::create(&name, lock_region_size()) {
            Ok(region) => WriterLock::init(region),
            Err(CacheError::AlreadyExists(_)) => {
                WriterLock::attach(SharedRegion::open(&name, lock_region_size())?)
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes the lock segment of `table_name`.
    ///
    /// Handles that are still open keep using the old mutex, so only call this
    /// once no writer is running.
    pub fn remove(table_name: &str) -> Result<()> {
        unlink(&lock_name(table_name))
    }

    pub(crate) fn init(mut region: SharedRegion) -> Result<WriterLock> {
        let base = region.byte_slice_mut(0, lock_region_size())?.as_mut_ptr();
        let (lock, used) = unsafe {
            let mutex = base.add(READY_SIZE);
            let data = mutex.add(Mutex::size_of(Some(mutex)));
            Mutex::new(mutex, data).map_err(lock_error)?
        };
        unsafe { ready_word(base) }.store(READY, Ordering::Release);
        region.persist();
        debug!("initialised writer lock {} ({} bytes)", region.name(), used);
        Ok(WriterLock {
            lock: Some(lock),
            region,
            creator: true,
        })
    }

    fn attach(mut region: SharedRegion) -> Result<WriterLock> {
        let base = region.byte_slice_mut(0, lock_region_size())?.as_mut_ptr();
        let ready = unsafe { ready_word(base) };
        let mut attempts = 0;
        while ready.load(Ordering::Acquire) != READY {
            attempts += 1;
            if attempts > READY_WAIT_ATTEMPTS {
                return Err(CacheError::Lock(format!(
                    "{} was never initialised, remove it and retry",
                    region.name()
                )));
            }
            thread::sleep(READY_WAIT_INTERVAL);
        }
        let (lock, _) = unsafe {
            let mutex = base.add(READY_SIZE);
            let data = mutex.add(Mutex::size_of(Some(mutex)));
            Mutex::from_existing(mutex, data).map_err(lock_error)?
        };
        debug!("attached to writer lock {}", region.name());
        Ok(WriterLock {
            lock: Some(lock),
            region,
            creator: false,
        })
    }

    /// Whether this handle initialised the mutex.
    #[inline]
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// Runs `f` while holding the lock.
    pub fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let lock = self.lock.as_ref().ok_or(CacheError::Closed)?;
        let _guard = lock.lock().map_err(lock_error)?;
        Ok(f())
    }

    /// Like [`write`](Self::write), giving up after `timeout`.
    pub fn try_write<R, F>(&self, timeout: Duration, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let lock = self.lock.as_ref().ok_or(CacheError::Closed)?;
        let _guard = lock.try_lock(Timeout::Val(timeout)).map_err(lock_error)?;
        Ok(f())
    }

    /// Unmaps this handle. The segment itself stays; see [`remove`](Self::remove).
    pub fn close(&mut self) -> Result<()> {
        self.lock = None;
        self.region.close()
    }
}

//! Named POSIX shared-memory region.
//!
//! A [`SharedRegion`] is a fixed-size block of bytes mapped into the calling
//! process. The first process to allocate a name is the [`Role::Creator`] and
//! destroys the OS object when it closes; every later process is an
//! [`Role::Attacher`] and only unmaps its own view.
//!
//! Unlinking while attachers still hold the region is safe on POSIX systems:
//! existing mappings stay valid until each of them is released, the name just
//! stops resolving for new `open` calls. Other platforms may not give that
//! guarantee.

use std::cmp;
use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;
use std::slice;
use std::thread;
use std::time::Duration;

use shared_memory::{Shmem, ShmemConf, ShmemError};
use tracing::{debug, warn};

use crate::errors::{CacheError, Result};

// A peer between shm_open(O_CREAT) and ftruncate shows a zero-length segment.
const SIZE_WAIT_ATTEMPTS: u32 = 100;
const SIZE_WAIT_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// Allocated the segment; unlinks it on close.
    Creator,
    /// Opened an existing segment; only unmaps on close.
    Attacher,
}

pub struct SharedRegion {
    name: String,
    capacity: usize,
    role: Role,
    shmem: Option<Shmem>,
}

/// Returns the OS identifier for `name`. POSIX requires a leading slash.
pub fn os_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

/// Removes the named segment without mapping it.
///
/// Processes that already mapped the segment keep their view. Used to recover
/// from a creator that died before closing.
pub fn unlink(name: &str) -> Result<()> {
    let os_id = os_name(name);
    let c_name = c_name(&os_id).map_err(CacheError::Unlink)?;
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } == -1 {
        return Err(CacheError::Unlink(io::Error::last_os_error()));
    }
    debug!("unlinked shared memory {}", os_id);
    Ok(())
}

fn c_name(os_id: &str) -> io::Result<CString> {
    CString::new(os_id).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

/// `capacity` rounded up to whole pages, as some platforms report segments.
fn page_rounded(capacity: usize) -> usize {
    let page = page_size();
    (capacity + page - 1) / page * page
}

/// Current length of the named segment, without mapping it.
fn segment_len(os_id: &str) -> io::Result<usize> {
    let c_name = c_name(os_id)?;
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    let mut stat: libc::stat = unsafe { mem::zeroed() };
    let rc = unsafe { libc::fstat(fd, &mut stat) };
    let err = io::Error::last_os_error();
    unsafe { libc::close(fd) };
    if rc == -1 {
        return Err(err);
    }
    Ok(stat.st_size as usize)
}

/// Waits for a segment that exists but has not been sized yet.
///
/// Errors other than a missing name are left for the mapping to report.
fn wait_for_size(os_id: &str, capacity: usize) -> Result<()> {
    for _ in 0..SIZE_WAIT_ATTEMPTS {
        match segment_len(os_id) {
            Ok(0) => thread::sleep(SIZE_WAIT_INTERVAL),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                return Err(CacheError::NotFound(os_id.to_string()))
            }
            _ => return Ok(()),
        }
    }
    Err(CacheError::SizeMismatch {
        name: os_id.to_string(),
        expected: capacity,
        actual: 0,
    })
}

impl SharedRegion {
    /// Allocates a new segment of exactly `capacity` bytes and maps it.
    pub fn create(name: &str, capacity: usize) -> Result<SharedRegion> {
        let name = os_name(name);
        let shmem = ShmemConf::new()
            .os_id(&name)
            .size(capacity)
            .create()
            .map_err(|e| match e {
                ShmemError::MappingIdExists => CacheError::AlreadyExists(name.clone()),
                e => CacheError::Allocation(e),
            })?;
        debug!("created shared memory {} ({} bytes)", name, capacity);
        Ok(SharedRegion {
            name,
            capacity,
            role: Role::Creator,
            shmem: Some(shmem),
        })
    }

    /// Attaches to an existing segment created with `capacity` bytes.
    ///
    /// The segment must be exactly `capacity` bytes, or that rounded up to a
    /// page; any other length was created for a different capacity and is
    /// rejected with [`CacheError::SizeMismatch`]. A segment that another process has not
    /// sized yet is waited for briefly.
    pub fn open(name: &str, capacity: usize) -> Result<SharedRegion> {
        let name = os_name(name);
        wait_for_size(&name, capacity)?;
        let shmem = ShmemConf::new().os_id(&name).open().map_err(|e| match e {
            ShmemError::MapOpenFailed(code) if code == libc::ENOENT as u32 => {
                CacheError::NotFound(name.clone())
            }
            e => CacheError::Allocation(e),
        })?;
        if shmem.len() != capacity && shmem.len() != page_rounded(capacity) {
            return Err(CacheError::SizeMismatch {
                name,
                expected: capacity,
                actual: shmem.len(),
            });
        }
        debug!("opened shared memory {} ({} bytes)", name, shmem.len());
        Ok(SharedRegion {
            name,
            capacity,
            role: Role::Attacher,
            shmem: Some(shmem),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn is_creator(&self) -> bool {
        self.role == Role::Creator
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shmem.is_none()
    }

    #[inline]
    fn shmem(&self) -> Result<&Shmem> {
        self.shmem.as_ref().ok_or(CacheError::Closed)
    }

    /// Number of bytes available from `offset` when `wanted` are requested.
    #[inline]
    fn clamp(&self, offset: usize, wanted: usize) -> usize {
        if offset >= self.capacity {
            0
        } else {
            cmp::min(wanted, self.capacity - offset)
        }
    }

    /// Copies bytes starting at `offset` into `dst`.
    ///
    /// The copy is truncated at the end of the region instead of failing, so
    /// the returned count may be smaller than `dst.len()`.
    pub fn read_at(&self, dst: &mut [u8], offset: usize) -> Result<usize> {
        let shmem = self.shmem()?;
        let count = self.clamp(offset, dst.len());
        if count == 0 {
            return Ok(0);
        }
        unsafe {
            ptr::copy_nonoverlapping(shmem.as_ptr().add(offset), dst.as_mut_ptr(), count);
        }
        Ok(count)
    }

    /// Copies `src` into the region at `offset`, truncated like [`read_at`](Self::read_at).
    pub fn write_at(&mut self, src: &[u8], offset: usize) -> Result<usize> {
        let shmem = self.shmem()?;
        let count = self.clamp(offset, src.len());
        if count == 0 {
            return Ok(0);
        }
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), shmem.as_ptr().add(offset), count);
        }
        Ok(count)
    }

    /// Zero-copy view of `[offset, end)`, with both bounds clamped to the region.
    ///
    /// Other processes may write the bytes while the view is alive.
    pub fn byte_slice(&self, offset: usize, end: usize) -> Result<&[u8]> {
        let shmem = self.shmem()?;
        let end = cmp::min(end, self.capacity);
        let start = cmp::min(offset, end);
        Ok(unsafe { slice::from_raw_parts(shmem.as_ptr().add(start), end - start) })
    }

    pub fn byte_slice_mut(&mut self, offset: usize, end: usize) -> Result<&mut [u8]> {
        let shmem = self.shmem()?;
        let end = cmp::min(end, self.capacity);
        let start = cmp::min(offset, end);
        Ok(unsafe { slice::from_raw_parts_mut(shmem.as_ptr().add(start), end - start) })
    }

    /// Hands the segment over to the OS namespace: closing this handle will
    /// only unmap it, and the segment stays until [`unlink`] is called.
    pub fn persist(&mut self) {
        self.role = Role::Attacher;
    }

    /// Unmaps the region and, for the creator, unlinks the OS object.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let mut shmem = match self.shmem.take() {
            Some(v) => v,
            None => return Ok(()),
        };
        match self.role {
            Role::Attacher => {
                drop(shmem);
                debug!("detached from shared memory {}", self.name);
                Ok(())
            }
            Role::Creator => {
                // Unlink ourselves so that a failure reaches the caller.
                shmem.set_owner(false);
                drop(shmem);
                unlink(&self.name)
            }
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close shared memory {}: {}", self.name, e);
        }
    }
}

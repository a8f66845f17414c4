use std::{fmt, io};

use shared_memory::ShmemError;

#[derive(Debug)]
pub enum CacheError {
    AlreadyExists(String),
    NotFound(String),
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    Allocation(ShmemError),
    Unlink(io::Error),
    Closed,
    // raw_sync hands back a non-Send Box<dyn Error>, so only its message is kept.
    Lock(String),
    Config(confy::ConfyError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::AlreadyExists(name) => write!(f, "Shared memory {} already exists", name),
            CacheError::NotFound(name) => write!(f, "Shared memory {} not found", name),
            CacheError::SizeMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "Shared memory {} is {} bytes, expected {}",
                name, actual, expected
            ),
            CacheError::Allocation(e) => write!(f, "Shared memory error: {}", e),
            CacheError::Unlink(e) => write!(f, "Failed to unlink shared memory: {}", e),
            CacheError::Closed => write!(f, "Shared memory handle is closed"),
            CacheError::Lock(s) => write!(f, "Lock error: {}", s),
            CacheError::Config(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Allocation(e) => Some(e),
            CacheError::Unlink(e) => Some(e),
            CacheError::Config(e) => Some(e),
            CacheError::AlreadyExists(_)
            | CacheError::NotFound(_)
            | CacheError::SizeMismatch { .. }
            | CacheError::Closed
            | CacheError::Lock(_) => None,
        }
    }
}

impl From<ShmemError> for CacheError {
    fn from(err: ShmemError) -> Self {
        CacheError::Allocation(err)
    }
}

impl From<confy::ConfyError> for CacheError {
    fn from(err: confy::ConfyError) -> Self {
        CacheError::Config(err)
    }
}

// raw_sync reports failures as Box<dyn Error>.
pub(crate) fn lock_error<E: fmt::Display>(err: E) -> CacheError {
    CacheError::Lock(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_mismatch_message_names_both_sizes() {
        let err = CacheError::SizeMismatch {
            name: "/quotes".to_string(),
            expected: 1604,
            actual: 164,
        };
        assert_eq!(
            err.to_string(),
            "Shared memory /quotes is 164 bytes, expected 1604"
        );
    }

    #[test]
    fn unlink_error_exposes_source() {
        let err = CacheError::Unlink(io::Error::from_raw_os_error(libc::ENOENT));
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&CacheError::Closed).is_none());
    }
}

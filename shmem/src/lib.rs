//! Fixed-capacity price quote cache shared between processes through a
//! named POSIX shared-memory segment.

mod errors;
pub mod config;
pub mod lock;
pub mod records;
pub mod region;
pub mod table;
pub mod ticker;
#[cfg(test)]
mod tests;

pub use config::CacheConfig;
pub use errors::{CacheError, Result};
pub use lock::WriterLock;
pub use records::Record;
pub use region::{Role, SharedRegion};
pub use table::QuoteTable;
pub use ticker::{KeyHasher, TickerKey, XxKeyHasher};

use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::errors::Result;

pub const DEFAULT_NAME: &str = "/price-oracle";
pub const DEFAULT_CAPACITY: u32 = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shared memory name, e.g. `/price-oracle`.
    pub name: String,
    /// Number of quotes the table is sized for. Every process sharing
    /// `name` must use the same value.
    pub capacity: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            name: DEFAULT_NAME.to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Loads a TOML config, writing the defaults first if the file is missing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CacheConfig> {
        Ok(confy::load_path(path)?)
    }
}

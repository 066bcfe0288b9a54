use serde::{Deserialize, Serialize};

use crate::MemoryTaskStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on the number of records kept in memory. Once it is
    /// reached, the oldest `sent` and `failed` records are dropped first.
    /// Pending records are never dropped.
    ///
    /// Default: 10000
    #[serde(default = "defaults::max_records")]
    pub max_records: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_records: defaults::max_records(),
        }
    }
}

impl StoreConfig {
    /// Build the in-memory store this configuration describes.
    #[must_use]
    pub fn build(&self) -> MemoryTaskStore {
        MemoryTaskStore::with_retention(self.max_records)
    }
}

mod defaults {
    pub const fn max_records() -> usize {
        10_000
    }
}

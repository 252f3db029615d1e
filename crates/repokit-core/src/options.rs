//! # Repository Options
//!
//! Tunables shared by every adapter.
//!
//! ```toml
//! [repository]
//! batch_size = 100           # entities per independently committed chunk
//! max_parallel_batches = 4   # chunks in flight at once
//! page_size = 100            # rows fetched per page while enumerating
//! ```

use serde::{Deserialize, Serialize};

use crate::validation::{validate_size, ValidationResult};

/// Upper bound for every size setting.
pub const MAX_SIZE_SETTING: usize = 10_000;

/// Batch and paging settings for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryOptions {
    /// Entities per chunk in `store_all`.
    /// Default: 100
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Chunks committed concurrently in `store_all`.
    /// Default: 4
    #[serde(default = "default_max_parallel_batches")]
    pub max_parallel_batches: usize,

    /// Rows fetched per round trip by enumerable contexts.
    /// Default: 100
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_batch_size() -> usize {
    100
}
fn default_max_parallel_batches() -> usize {
    4
}
fn default_page_size() -> usize {
    100
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        RepositoryOptions {
            batch_size: default_batch_size(),
            max_parallel_batches: default_max_parallel_batches(),
            page_size: default_page_size(),
        }
    }
}

impl RepositoryOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk size for batched stores.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets how many chunks may commit concurrently.
    pub fn max_parallel_batches(mut self, n: usize) -> Self {
        self.max_parallel_batches = n;
        self
    }

    /// Sets the enumeration page size.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Validates every setting is within `1..=MAX_SIZE_SETTING`.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_size("batch_size", self.batch_size, MAX_SIZE_SETTING)?;
        validate_size("max_parallel_batches", self.max_parallel_batches, MAX_SIZE_SETTING)?;
        validate_size("page_size", self.page_size, MAX_SIZE_SETTING)?;
        Ok(())
    }
}

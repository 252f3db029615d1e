//! # Batched Stores
//!
//! Chunked, bounded-concurrency inserts shared by every adapter.
//!
//! ## Fan-out
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  store_all(250 entities), batch_size = 100, max_parallel_batches = 2   │
//! │                                                                         │
//! │  partition:   [0..100)   [100..200)   [200..250)                       │
//! │                  │           │            │                             │
//! │                  ▼           ▼            │ (waits for a free slot)     │
//! │               chunk 0     chunk 1         ▼                             │
//! │               commit      commit       chunk 2                          │
//! │                                        commit                           │
//! │                                                                         │
//! │  Each chunk is its own unit of work: a failed chunk is reported with   │
//! │  its keys, committed chunks stay committed.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::stream::{self, StreamExt};
use std::future::Future;
use tracing::{debug, warn};

use crate::error::{ChunkFailure, RepoError, RepoResult};
use crate::key::Key;
use crate::options::RepositoryOptions;

/// Outcome of a fully successful batched store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchReport {
    /// Entities committed.
    pub stored: usize,
    /// Chunks committed.
    pub chunks: usize,
}

/// Splits `items` into chunks of at most `size` (a size of 0 is treated as 1).
pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();

    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }

    chunks
}

/// Stores `entities` chunk by chunk through `store_chunk`.
///
/// ## Arguments
/// * `entities` - Everything to store
/// * `options` - Chunk size and parallelism
/// * `key_of` - Key extractor, used to report failed chunks
/// * `store_chunk` - Commits one chunk as a single unit of work
///
/// ## Returns
/// * `Ok(BatchReport)` - Every chunk committed
/// * `Err(RepoError::BatchFailed)` - At least one chunk failed
pub async fn store_in_chunks<T, K, F, Fut>(
    entities: Vec<T>,
    options: &RepositoryOptions,
    key_of: K,
    store_chunk: F,
) -> RepoResult<BatchReport>
where
    K: Fn(&T) -> Key,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = RepoResult<()>>,
{
    let total = entities.len();
    let chunks = partition(entities, options.batch_size);
    let chunk_count = chunks.len();

    debug!(
        total,
        chunks = chunk_count,
        batch_size = options.batch_size,
        "Storing batch"
    );

    let outcomes: Vec<(usize, Vec<Key>, usize, RepoResult<()>)> =
        stream::iter(chunks.into_iter().enumerate().map(|(index, chunk)| {
            let keys: Vec<Key> = chunk.iter().map(&key_of).collect();
            let len = chunk.len();
            let pending = store_chunk(chunk);
            async move { (index, keys, len, pending.await) }
        }))
        .buffer_unordered(options.max_parallel_batches.max(1))
        .collect()
        .await;

    let mut committed = 0;
    let mut failures = Vec::new();

    for (index, keys, len, outcome) in outcomes {
        match outcome {
            Ok(()) => committed += len,
            Err(e) => {
                warn!(chunk = index, entities = len, error = %e, "Batch chunk failed");
                failures.push(ChunkFailure {
                    index,
                    keys,
                    reason: e.to_string(),
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(BatchReport {
            stored: committed,
            chunks: chunk_count,
        })
    } else {
        failures.sort_by_key(|f| f.index);
        Err(RepoError::BatchFailed {
            committed,
            failures,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

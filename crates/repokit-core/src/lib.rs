//! # repokit-core: Repository Contract
//!
//! This crate defines the uniform repository interface shared by every
//! persistence backend, plus the in-memory reference adapter.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        repokit Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Application code                             │   │
//! │  │    repo.store(e) ─ repo.find(&k) ─ repo.update(patch, &k)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Repository<T>                          │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ repokit-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │repository │  │    key    │  │  patch    │  │  memory   │  │   │
//! │  │   │ traits    │  │ Key tuple │  │ MergePatch│  │ InMemory  │  │   │
//! │  │   │ contexts  │  │ extractor │  │ path upd. │  │ adapter   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO SQL • NO DRIVERS • BACKEND-INDEPENDENT                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    repokit-db (SQLite adapters)                 │   │
//! │  │           TableRepository, DocumentRepository, Database         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`repository`] - `Repository`, `ObjectContext`, `EnumerableContext`
//! - [`key`] - Key tuples and key extractors
//! - [`patch`] - Typed patches and JSON merge patches
//! - [`path`] - Updates addressed by property path
//! - [`batch`] - Chunked, bounded-concurrency stores
//! - [`memory`] - In-memory adapter
//! - [`options`] - Batch and paging options
//! - [`validation`] - Identifier and size validation
//! - [`error`] - Unified error taxonomy
//!
//! ## Example Usage
//!
//! ```rust
//! use repokit_core::{InMemoryRepository, Key, ObjectContext, Repository};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct TestObject {
//!     id: i64,
//!     value: String,
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let repo = InMemoryRepository::new(|o: &TestObject| Key::from(o.id));
//! repo.store(TestObject { id: 1, value: "a".into() }).await.unwrap();
//!
//! repo.update(|o: &mut TestObject| o.value = "b".into(), &Key::from(1))
//!     .await
//!     .unwrap();
//!
//! let ctx = repo.find(&Key::from(1)).await.unwrap();
//! assert_eq!(ctx.object().unwrap().value, "b");
//! # });
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod batch;
pub mod error;
pub mod key;
pub mod memory;
pub mod options;
pub mod patch;
pub mod path;
pub mod repository;
pub mod validation;

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use batch::BatchReport;
pub use error::{ChunkFailure, RepoError, RepoResult, ValidationError};
pub use key::{Key, KeyExtractor, KeyValue};
pub use memory::InMemoryRepository;
pub use options::RepositoryOptions;
pub use patch::{MergePatch, Patch};
pub use path::{PropertyPath, UpdateType};
pub use repository::{Entity, EnumerableContext, ObjectContext, Repository};

// =============================================================================
// Conformance of the baseline adapter
// =============================================================================

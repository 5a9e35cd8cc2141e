//! # fieldguard
//!
//! Database-backed existence and uniqueness checks for field validation.
//!
//! fieldguard answers "is this value already taken?" against a relational
//! store (parameterized SQL) or a document store (filter documents).
//! Concurrent checks on the same field are coalesced into one round trip and
//! answers are cached per normalized check signature.
//!
//! ## Quick Start
//!
//! ### As a CLI
//!
//! ```bash
//! fieldguard --sqlite ./app.db --rule unique --collection users --field email \
//!     --value '"new@example.com"' --value '"taken@example.com"'
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use fieldguard::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> fieldguard::Result<()> {
//! let store = MemoryDocumentStore::new();
//! store.insert("users", json!({ "username": "takenuser" }))?;
//!
//! let engine = ExistenceEngine::new(Backend::document(store));
//! let check = ExistenceCheck::field("users", "username", "takenuser");
//! assert!(engine.exists(&check).await?);
//! assert!(!engine.unique(&check).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! fieldguard is composed of several crates:
//!
//! - `fieldguard-core` - Condition trees, query compilers, check signatures, filter evaluation
//! - `fieldguard-storage` - Backend contracts plus SQLite and in-memory document stores
//! - `fieldguard-engine` - Existence engine, batch coordinator, result cache, rule predicates
//!
//! ## Features
//!
//! - **Condition Trees**: nested AND/OR groups with exclusions
//! - **Two Backends**: `??`/`?` parameterized SQL and `$and`/`$or` filter documents
//! - **Batching**: one set-membership query per field for concurrent checks
//! - **Caching**: configurable TTL and capacity, never-expire by default

// Re-export core types
pub use fieldguard_core::{
    BackendError, BackendKind, CheckSignature, ConditionNode, DocumentCompiler, DocumentFilter, Error,
    ExistenceCheck, Filter, Logic, PhysicalQuery, QueryCompiler, RelationalCompiler, Result, StoreError,
};

// Re-export storage
pub use fieldguard_storage::{Backend, DocumentStore, MemoryDocumentStore, RelationalStore, SqliteStore};

// Re-export engine
pub use fieldguard_engine::{
    rules, CachePolicy, ConstraintSpec, EngineBuilder, EngineConfig, EvictionPolicy, ExistenceEngine,
    ResultCache, TtlPolicy,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Backend, CachePolicy, ConditionNode, ConstraintSpec, DocumentStore, EngineConfig, Error,
        ExistenceCheck, ExistenceEngine, MemoryDocumentStore, RelationalStore, Result, SqliteStore,
    };
}

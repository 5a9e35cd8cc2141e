//! # fieldguard Engine
//!
//! Existence and uniqueness checks over a relational or document backend,
//! with per-key batching of concurrent checks and a result cache.
//!
//! - [`ExistenceEngine`] - `exists` / `unique` / `not_exists`
//! - [`BatchCoordinator`] - coalesces concurrent misses into one round trip
//! - [`ResultCache`] - signature-keyed answers with an injectable [`EvictionPolicy`]
//! - [`rules`] - predicates for a validation layer

pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;
pub mod rules;

pub use batch::BatchCoordinator;
pub use cache::{CacheStats, EvictionPolicy, NeverExpire, ResultCache, TtlPolicy};
pub use config::{CachePolicy, EngineConfig};
pub use engine::{EngineBuilder, ExistenceEngine};
pub use rules::{ConstraintSpec, OneOrMany};

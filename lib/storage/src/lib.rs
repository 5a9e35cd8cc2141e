//! # fieldguard Storage
//!
//! Store backends for existence checks:
//!
//! - [`Backend`] - the closed set of backend variants, chosen once per engine
//! - [`SqliteStore`] - relational store on SQLite
//! - [`MemoryDocumentStore`] - in-process document store

pub mod backend;
pub mod collection;
pub mod manager;
pub mod sqlite;

pub use backend::{Backend, DocumentStore, QueryOutcome, RelationalStore, Row};
pub use collection::{CollectionConfig, DocumentCollection};
pub use manager::MemoryDocumentStore;
pub use sqlite::SqliteStore;

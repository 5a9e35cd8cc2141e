//! # fieldguard Core
//!
//! Core library for fieldguard existence checks.
//!
//! This crate provides the pure building blocks of the engine:
//!
//! - [`ConditionNode`] / [`ExistenceCheck`] - condition trees with AND/OR groups and exclusions
//! - [`RelationalCompiler`] / [`DocumentCompiler`] - compile checks to SQL or filter documents
//! - [`CheckSignature`] - normalized cache and batch keys
//! - [`DocumentFilter`] - evaluate filter documents against JSON records
//!
//! ## Example
//!
//! ```rust
//! use fieldguard_core::{ConditionNode, DocumentCompiler, ExistenceCheck, QueryCompiler};
//! use serde_json::json;
//!
//! let check = ExistenceCheck::tree(
//!     "users",
//!     vec![ConditionNode::group(vec![
//!         ConditionNode::leaf("username", "takenuser"),
//!         ConditionNode::leaf("email", "taken@example.com").or(),
//!     ])],
//! )
//! .excluding(ConditionNode::leaf("id", 42));
//!
//! let query = DocumentCompiler::new()
//!     .compile(&check.collection, &check.conditions, &check.exclude)
//!     .unwrap();
//! assert_eq!(
//!     query.filter,
//!     json!({ "$and": [
//!         { "$or": [{ "username": "takenuser" }, { "email": "taken@example.com" }] },
//!         { "id": { "$ne": 42 } }
//!     ]})
//! );
//! ```

pub mod condition;
pub mod compiler;
pub mod error;
pub mod filter;
pub mod signature;

pub use condition::{
    is_empty_value, values_equal, ConditionNode, ExistenceCheck, Logic, NodeKind,
};
pub use compiler::{
    DocumentCompiler, DocumentOp, DocumentQuery, PhysicalQuery, QueryCompiler,
    RelationalCompiler, RelationalOutput, RelationalQuery, SqlParam, WhereClause,
};
pub use error::{BackendError, Error, Result, StoreError};
pub use filter::{DocumentFilter, Filter, FilterCondition};
pub use signature::{BackendKind, BatchKey, CheckSignature, Fingerprint, Subject};

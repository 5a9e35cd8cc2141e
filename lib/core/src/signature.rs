//! Normalized check signatures
//!
//! A [`CheckSignature`] is the cache key for a check. Its [`BatchKey`] decides
//! which pending checks may share one physical query.

use crate::condition::{ConditionNode, ExistenceCheck, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Relational,
    Document,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Relational => f.write_str("relational"),
            BackendKind::Document => f.write_str("document"),
        }
    }
}

/// Canonical text form of a value or a condition sequence.
///
/// Object keys come out sorted and the connector of a first sibling is
/// dropped, so logically identical inputs share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_value(value: &Value) -> Self {
        Fingerprint(value.to_string())
    }

    pub fn of_nodes(nodes: &[ConditionNode]) -> Self {
        let mut out = String::new();
        write_nodes(nodes, &mut out);
        Fingerprint(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn write_nodes(nodes: &[ConditionNode], out: &mut String) {
    out.push('[');
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            let _ = write!(out, " {} ", node.logic().keyword());
        }
        match node.kind("") {
            Ok(NodeKind::Leaf { field, value }) => {
                let _ = write!(out, "{}={}", Value::from(field), value);
            }
            Ok(NodeKind::Group(children)) => write_nodes(children, out),
            Err(_) => out.push('?'),
        }
    }
    out.push(']');
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Field { field: String, value: Fingerprint },
    Tree(Fingerprint),
}

/// Cache key: `(backend, collection, field, value, exclusion)` for single-field
/// checks, `(backend, collection, condition, exclusion)` for trees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckSignature {
    pub backend: BackendKind,
    pub collection: String,
    pub subject: Subject,
    pub exclusion: Fingerprint,
}

/// Membership key of a batch queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BatchKey {
    /// Values for one field are resolved together by a set-membership query
    Field {
        backend: BackendKind,
        collection: String,
        field: String,
    },
    /// Identical tree checks share one count query
    Check(CheckSignature),
}

impl CheckSignature {
    pub fn for_check(backend: BackendKind, check: &ExistenceCheck) -> Self {
        let subject = match check.single_field() {
            Some((field, value)) => Subject::Field {
                field: field.to_string(),
                value: Fingerprint::of_value(value),
            },
            None => Subject::Tree(Fingerprint::of_nodes(&check.conditions)),
        };

        Self {
            backend,
            collection: check.collection.clone(),
            subject,
            exclusion: Fingerprint::of_nodes(&check.exclude),
        }
    }

    pub fn batch_key(&self) -> BatchKey {
        match &self.subject {
            Subject::Field { field, .. } => BatchKey::Field {
                backend: self.backend,
                collection: self.collection.clone(),
                field: field.clone(),
            },
            Subject::Tree(_) => BatchKey::Check(self.clone()),
        }
    }
}

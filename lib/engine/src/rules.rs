//! Asynchronous rule predicates for a validation layer.
//!
//! A rule receives the value under validation and a [`ConstraintSpec`]
//! naming where to look for it.

use crate::engine::ExistenceEngine;
use fieldguard_core::{ConditionNode, Error, ExistenceCheck, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a rule looks for the value it validates
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub collection: String,

    /// Field compared against the validated value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Extra conditions AND-ed after the field comparison
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionNode>,

    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    pub exclude: OneOrMany,
}

/// Accepts either a single node or a list of nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    // Tried first: a derived struct also accepts sequences
    Many(Vec<ConditionNode>),
    One(Box<ConditionNode>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn is_empty(&self) -> bool {
        matches!(self, OneOrMany::Many(nodes) if nodes.is_empty())
    }

    pub fn into_vec(self) -> Vec<ConditionNode> {
        match self {
            OneOrMany::One(node) => vec![*node],
            OneOrMany::Many(nodes) => nodes,
        }
    }
}

impl ConstraintSpec {
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: Some(field.into()),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, node: ConditionNode) -> Self {
        let mut nodes = std::mem::take(&mut self.exclude).into_vec();
        nodes.push(node);
        self.exclude = OneOrMany::Many(nodes);
        self
    }

    /// The check for `value`: a leaf on `field` (when set) followed by the
    /// extra conditions
    pub fn to_check(&self, value: &Value) -> ExistenceCheck {
        let mut conditions = Vec::with_capacity(self.conditions.len() + 1);
        if let Some(field) = &self.field {
            conditions.push(ConditionNode::leaf(field.clone(), value.clone()));
        }
        conditions.extend(self.conditions.iter().cloned());

        ExistenceCheck {
            collection: self.collection.clone(),
            conditions,
            exclude: self.exclude.clone().into_vec(),
        }
    }
}

fn configured(engine: Option<&ExistenceEngine>) -> Result<&ExistenceEngine> {
    engine.ok_or_else(|| Error::Configuration("no existence engine supplied".to_string()))
}

/// Passes when a matching record exists
pub async fn exists(value: &Value, spec: &ConstraintSpec, engine: Option<&ExistenceEngine>) -> Result<bool> {
    configured(engine)?.exists(&spec.to_check(value)).await
}

/// Passes when no matching record exists
pub async fn unique(value: &Value, spec: &ConstraintSpec, engine: Option<&ExistenceEngine>) -> Result<bool> {
    configured(engine)?.unique(&spec.to_check(value)).await
}

pub async fn not_exists(value: &Value, spec: &ConstraintSpec, engine: Option<&ExistenceEngine>) -> Result<bool> {
    configured(engine)?.not_exists(&spec.to_check(value)).await
}

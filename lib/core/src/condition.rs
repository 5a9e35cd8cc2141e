//! Condition trees
//!
//! A check is described by an ordered list of [`ConditionNode`]s. Each node is
//! either a leaf (`field` + `value`) or a group of child nodes. Siblings are
//! joined by their `logic` connector; the connector on the first sibling of a
//! sequence carries no meaning.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Connector joining a node to the sibling before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Logic {
    #[default]
    #[serde(rename = "AND", alias = "and", alias = "And")]
    And,
    #[serde(rename = "OR", alias = "or", alias = "Or")]
    Or,
}

impl Logic {
    pub fn keyword(self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }
}

/// One node of a condition tree, in the loose shape callers write it.
///
/// Use [`ConditionNode::kind`] to get the validated view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// `Some(Value::Null)` is an explicit null, `None` means the key was absent.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Logic>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Vec<ConditionNode>>,
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Validated view of a [`ConditionNode`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind<'a> {
    Leaf { field: &'a str, value: &'a Value },
    Group(&'a [ConditionNode]),
}

impl ConditionNode {
    pub fn leaf(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: Some(field.into()),
            value: Some(value.into()),
            logic: None,
            group: None,
        }
    }

    pub fn group(nodes: Vec<ConditionNode>) -> Self {
        Self {
            field: None,
            value: None,
            logic: None,
            group: Some(nodes),
        }
    }

    /// Join this node to its previous sibling with OR
    pub fn or(mut self) -> Self {
        self.logic = Some(Logic::Or);
        self
    }

    /// Join this node to its previous sibling with AND
    pub fn and(mut self) -> Self {
        self.logic = Some(Logic::And);
        self
    }

    pub fn logic(&self) -> Logic {
        self.logic.unwrap_or_default()
    }

    /// Classify the node, rejecting anything that is not exactly a leaf or
    /// exactly a non-empty group. `path` only feeds the error message.
    pub fn kind(&self, path: &str) -> Result<NodeKind<'_>> {
        let leaf = match (&self.field, &self.value) {
            (Some(field), Some(value)) if !field.is_empty() => Some((field.as_str(), value)),
            (Some(field), Some(_)) if field.is_empty() => {
                return Err(Error::shape(path, "field name must not be empty"));
            }
            _ => None,
        };
        let group = self.group.as_deref().filter(|g| !g.is_empty());

        match (leaf, group) {
            (Some((field, value)), None) => Ok(NodeKind::Leaf { field, value }),
            (None, Some(children)) => Ok(NodeKind::Group(children)),
            (Some(_), Some(_)) => Err(Error::shape(
                path,
                "node has both field/value and group",
            )),
            (None, None) => Err(Error::shape(
                path,
                "must have field/value or a non-empty group",
            )),
        }
    }
}

/// Validate every node of a sequence, recursively
pub fn validate_nodes(nodes: &[ConditionNode], path: &str) -> Result<()> {
    for (i, node) in nodes.iter().enumerate() {
        let node_path = format!("{path}[{i}]");
        if let NodeKind::Group(children) = node.kind(&node_path)? {
            validate_nodes(children, &format!("{node_path}.group"))?;
        }
    }
    Ok(())
}

/// Number of leaves under a sequence, ignoring malformed nodes
pub fn leaf_count(nodes: &[ConditionNode]) -> usize {
    nodes
        .iter()
        .map(|node| match node.kind("") {
            Ok(NodeKind::Leaf { .. }) => 1,
            Ok(NodeKind::Group(children)) => leaf_count(children),
            Err(_) => 0,
        })
        .sum()
}

/// First leaf value in depth-first order
pub fn first_leaf_value(nodes: &[ConditionNode]) -> Option<&Value> {
    nodes.iter().find_map(|node| match node.kind("") {
        Ok(NodeKind::Leaf { value, .. }) => Some(value),
        Ok(NodeKind::Group(children)) => first_leaf_value(children),
        Err(_) => None,
    })
}

/// Absent, `null` and `""` all count as "no value"
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Equality used when matching store results back to requested values.
///
/// Numbers compare numerically, and booleans equal the integers 0 and 1
/// since relational stores hand booleans back as integers.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => x == y,
            },
        },
        (Value::Bool(flag), Value::Number(n)) | (Value::Number(n), Value::Bool(flag)) => {
            n.as_i64() == Some(i64::from(*flag))
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// A single existence / uniqueness question against one collection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExistenceCheck {
    pub collection: String,

    #[serde(default)]
    pub conditions: Vec<ConditionNode>,

    /// Record(s) to leave out of the check, e.g. the caller's own row
    #[serde(default)]
    pub exclude: Vec<ConditionNode>,
}

impl ExistenceCheck {
    /// Does `collection` hold a record with `field == value`?
    pub fn field(
        collection: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            collection: collection.into(),
            conditions: vec![ConditionNode::leaf(field, value)],
            exclude: Vec::new(),
        }
    }

    pub fn tree(collection: impl Into<String>, conditions: Vec<ConditionNode>) -> Self {
        Self {
            collection: collection.into(),
            conditions,
            exclude: Vec::new(),
        }
    }

    /// Add an exclusion node (compiled negated)
    pub fn excluding(mut self, node: ConditionNode) -> Self {
        self.exclude.push(node);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(Error::shape("collection", "collection name must not be empty"));
        }
        validate_nodes(&self.conditions, "conditions")?;
        validate_nodes(&self.exclude, "exclude")
    }

    pub fn driving_value(&self) -> Option<&Value> {
        first_leaf_value(&self.conditions)
    }

    /// `Some((field, value))` when the check is one plain leaf; these are the
    /// checks that can share a set-membership query.
    pub fn single_field(&self) -> Option<(&str, &Value)> {
        match self.conditions.as_slice() {
            [node] => match node.kind("") {
                Ok(NodeKind::Leaf { field, value }) => Some((field, value)),
                _ => None,
            },
            _ => None,
        }
    }
}

//! Query compilation
//!
//! Turns condition trees into backend-native queries. Compilation is pure:
//! no I/O, and malformed nodes fail with [`Error::Shape`] before anything
//! reaches a store.
//!
//! Relational queries use `??` for identifiers and `?` for values. The
//! parameter list is filled in the order placeholders appear in the SQL.

use crate::condition::{ConditionNode, Logic, NodeKind};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Column alias of the membership query
pub const MATCHED_INDEX_COLUMN: &str = "matched_index";
/// Column alias of the count query
pub const COUNT_COLUMN: &str = "cnt";

/// Backend-specific compilation of checks
pub trait QueryCompiler {
    type Query;

    /// Count query for `conditions`, minus records matching `exclude`
    fn compile(
        &self,
        collection: &str,
        conditions: &[ConditionNode],
        exclude: &[ConditionNode],
    ) -> Result<Self::Query>;

    /// One query answering, for each of `values` in order, whether a record
    /// with `field` equal to it exists, minus records matching `exclude`.
    /// Each value is compared exactly as [`compile`](Self::compile) would
    /// compare it in a single-leaf check.
    fn compile_membership(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
        exclude: &[ConditionNode],
    ) -> Result<Self::Query>;
}

/// A query ready to run on exactly one backend variant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum PhysicalQuery {
    Relational(RelationalQuery),
    Document(DocumentQuery),
}

// ============================================================================
// Relational
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "param", rename_all = "lowercase")]
pub enum SqlParam {
    /// Bound to a `??` placeholder (table or column name)
    Ident(String),
    /// Bound to a `?` placeholder
    Value(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Result shape of a relational query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationalOutput {
    /// One row with a `cnt` column
    Count,
    /// One row per matching value, holding its position among the
    /// `values` requested in a `matched_index` column
    MatchedIndices { values: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationalQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub output: RelationalOutput,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RelationalCompiler;

impl RelationalCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Compile a node sequence to a WHERE fragment. Every leaf contributes
    /// exactly two parameters: its column, then its value.
    pub fn where_clause(&self, nodes: &[ConditionNode], negate: bool) -> Result<WhereClause> {
        let mut params = Vec::new();
        let sql = build_clause(nodes, "conditions", negate, &mut params)?;
        Ok(WhereClause { sql, params })
    }

    /// Append ` AND (<negated exclusion>)` to a primary clause
    fn restrict(
        &self,
        primary: WhereClause,
        exclude: &[ConditionNode],
        params: &mut Vec<SqlParam>,
    ) -> Result<String> {
        params.extend(primary.params);
        if exclude.is_empty() {
            return Ok(primary.sql);
        }

        let mut excluded = Vec::new();
        let exclusion = build_clause(exclude, "exclude", true, &mut excluded)?;
        params.extend(excluded);
        Ok(format!("({}) AND ({})", primary.sql, exclusion))
    }
}

fn build_clause(
    nodes: &[ConditionNode],
    path: &str,
    negate: bool,
    params: &mut Vec<SqlParam>,
) -> Result<String> {
    let mut parts = Vec::with_capacity(nodes.len());

    for (i, node) in nodes.iter().enumerate() {
        let node_path = format!("{path}[{i}]");
        let fragment = match node.kind(&node_path)? {
            NodeKind::Group(children) => {
                let inner = build_clause(children, &format!("{node_path}.group"), negate, params)?;
                format!("({inner})")
            }
            NodeKind::Leaf { field, value } => {
                params.push(SqlParam::Ident(field.to_string()));
                params.push(SqlParam::Value(value.clone()));
                // `= NULL` never matches a NULL column
                match (value.is_null(), negate) {
                    (false, false) => "?? = ?".to_string(),
                    (false, true) => "?? != ?".to_string(),
                    (true, false) => "?? IS ?".to_string(),
                    (true, true) => "?? IS NOT ?".to_string(),
                }
            }
        };

        if i == 0 {
            parts.push(fragment);
        } else {
            parts.push(format!("{} {}", node.logic().keyword(), fragment));
        }
    }

    Ok(parts.join(" "))
}

impl QueryCompiler for RelationalCompiler {
    type Query = RelationalQuery;

    fn compile(
        &self,
        collection: &str,
        conditions: &[ConditionNode],
        exclude: &[ConditionNode],
    ) -> Result<RelationalQuery> {
        let mut primary = self.where_clause(conditions, false)?;
        if primary.sql.is_empty() {
            primary.sql = "1=1".to_string();
        }

        let mut params = vec![SqlParam::Ident(collection.to_string())];
        let clause = self.restrict(primary, exclude, &mut params)?;

        Ok(RelationalQuery {
            sql: format!("SELECT COUNT(*) AS {COUNT_COLUMN} FROM ?? WHERE {clause}"),
            params,
            output: RelationalOutput::Count,
        })
    }

    fn compile_membership(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
        exclude: &[ConditionNode],
    ) -> Result<RelationalQuery> {
        if field.is_empty() {
            return Err(Error::shape("field", "field name must not be empty"));
        }
        if values.is_empty() {
            return Err(Error::shape("values", "membership query needs at least one value"));
        }

        let mut selects = Vec::with_capacity(values.len());
        let mut params = Vec::new();
        for (index, value) in values.iter().enumerate() {
            let primary = self.where_clause(&[ConditionNode::leaf(field, value.clone())], false)?;
            params.push(SqlParam::Value(Value::from(index)));
            params.push(SqlParam::Ident(collection.to_string()));
            let clause = self.restrict(primary, exclude, &mut params)?;
            selects.push(format!(
                "SELECT ? AS {MATCHED_INDEX_COLUMN} WHERE EXISTS (SELECT 1 FROM ?? WHERE {clause})"
            ));
        }

        Ok(RelationalQuery {
            sql: selects.join(" UNION ALL "),
            params,
            output: RelationalOutput::MatchedIndices { values: values.len() },
        })
    }
}

// ============================================================================
// Document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOp {
    Count,
    /// One answer per listed filter: does any document match it. The
    /// query's `filter` is their union.
    MatchEach(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentQuery {
    pub collection: String,
    pub filter: Value,
    pub op: DocumentOp,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentCompiler;

impl DocumentCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Compile a node sequence to a filter document. An empty sequence is
    /// the unconstrained filter `{}`.
    pub fn filter(&self, nodes: &[ConditionNode], negate: bool) -> Result<Value> {
        build_filter(nodes, "conditions", negate)
    }

    fn restrict(&self, primary: Value, exclude: &[ConditionNode]) -> Result<Value> {
        if exclude.is_empty() {
            return Ok(primary);
        }
        let exclusion = build_filter(exclude, "exclude", true)?;
        Ok(and_filters(primary, exclusion))
    }
}

fn build_filter(nodes: &[ConditionNode], path: &str, negate: bool) -> Result<Value> {
    let mut and_clauses = Vec::new();
    let mut or_clauses = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        let node_path = format!("{path}[{i}]");
        let clause = match node.kind(&node_path)? {
            NodeKind::Group(children) => build_filter(children, &format!("{node_path}.group"), negate)?,
            NodeKind::Leaf { field, value } => leaf_filter(field, value, negate),
        };

        // The first sibling has no connector of its own; it sides with the
        // operator that joins it to the next sibling.
        let logic = if i == 0 {
            nodes.get(1).map(ConditionNode::logic).unwrap_or(Logic::And)
        } else {
            node.logic()
        };

        match logic {
            Logic::And => and_clauses.push(clause),
            Logic::Or => or_clauses.push(clause),
        }
    }

    Ok(match (and_clauses.len(), or_clauses.len()) {
        (0, 0) => json!({}),
        (1, 0) => and_clauses.remove(0),
        (_, 0) => json!({ "$and": and_clauses }),
        (0, _) => json!({ "$or": or_clauses }),
        _ => {
            and_clauses.push(json!({ "$or": or_clauses }));
            json!({ "$and": and_clauses })
        }
    })
}

fn leaf_filter(field: &str, value: &Value, negate: bool) -> Value {
    let constraint = if negate {
        json!({ "$ne": value })
    } else if value.is_object() {
        // A bare object would be read as an operator document.
        json!({ "$eq": value })
    } else {
        value.clone()
    };

    let mut filter = Map::new();
    filter.insert(field.to_string(), constraint);
    Value::Object(filter)
}

fn and_filters(primary: Value, extra: Value) -> Value {
    if is_unconstrained(&primary) {
        return extra;
    }
    if is_unconstrained(&extra) {
        return primary;
    }
    json!({ "$and": [primary, extra] })
}

fn is_unconstrained(filter: &Value) -> bool {
    filter.as_object().map(Map::is_empty).unwrap_or(false)
}

impl QueryCompiler for DocumentCompiler {
    type Query = DocumentQuery;

    fn compile(
        &self,
        collection: &str,
        conditions: &[ConditionNode],
        exclude: &[ConditionNode],
    ) -> Result<DocumentQuery> {
        let primary = self.filter(conditions, false)?;
        Ok(DocumentQuery {
            collection: collection.to_string(),
            filter: self.restrict(primary, exclude)?,
            op: DocumentOp::Count,
        })
    }

    fn compile_membership(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
        exclude: &[ConditionNode],
    ) -> Result<DocumentQuery> {
        if field.is_empty() {
            return Err(Error::shape("field", "field name must not be empty"));
        }
        if values.is_empty() {
            return Err(Error::shape("values", "membership query needs at least one value"));
        }

        let filters = values
            .iter()
            .map(|value| self.restrict(leaf_filter(field, value, false), exclude))
            .collect::<Result<Vec<_>>>()?;

        Ok(DocumentQuery {
            collection: collection.to_string(),
            filter: json!({ "$or": filters }),
            op: DocumentOp::MatchEach(filters),
        })
    }
}

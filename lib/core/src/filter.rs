// Document filter evaluation for in-process stores
use crate::condition::values_equal;
use crate::StoreError;
use serde_json::{Map, Value};

pub trait Filter {
    fn matches(&self, document: &Value) -> bool;
}

/// A parsed filter document (`$and`, `$or`, `$eq`, `$ne`, `$in`)
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFilter {
    condition: FilterCondition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    And(Vec<FilterCondition>),
    Or(Vec<FilterCondition>),
}

impl DocumentFilter {
    pub fn new(condition: FilterCondition) -> Self {
        Self { condition }
    }

    pub fn parse(filter: &Value) -> Result<Self, StoreError> {
        Ok(Self::new(Self::parse_document(filter)?))
    }

    pub fn condition(&self) -> &FilterCondition {
        &self.condition
    }

    fn parse_document(filter: &Value) -> Result<FilterCondition, StoreError> {
        let map = filter
            .as_object()
            .ok_or_else(|| StoreError::new(format!("filter must be an object, got {filter}")))?;

        let mut conditions = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "$and" => conditions.push(FilterCondition::And(Self::parse_list(key, value)?)),
                "$or" => conditions.push(FilterCondition::Or(Self::parse_list(key, value)?)),
                op if op.starts_with('$') => {
                    return Err(StoreError::new(format!("unsupported top-level operator {op}")));
                }
                field => conditions.push(Self::parse_field(field, value)?),
            }
        }

        Ok(match conditions.len() {
            1 => conditions.remove(0),
            _ => FilterCondition::And(conditions),
        })
    }

    fn parse_list(op: &str, value: &Value) -> Result<Vec<FilterCondition>, StoreError> {
        value
            .as_array()
            .ok_or_else(|| StoreError::new(format!("{op} expects an array")))?
            .iter()
            .map(Self::parse_document)
            .collect()
    }

    fn parse_field(field: &str, value: &Value) -> Result<FilterCondition, StoreError> {
        let operators = match value.as_object() {
            Some(map) if is_operator_document(map) => map,
            _ => {
                return Ok(FilterCondition::Equals {
                    field: field.to_string(),
                    value: value.clone(),
                })
            }
        };

        let mut conditions = Vec::with_capacity(operators.len());
        for (op, operand) in operators {
            let condition = match op.as_str() {
                "$eq" => FilterCondition::Equals {
                    field: field.to_string(),
                    value: operand.clone(),
                },
                "$ne" => FilterCondition::NotEquals {
                    field: field.to_string(),
                    value: operand.clone(),
                },
                "$in" => FilterCondition::In {
                    field: field.to_string(),
                    values: operand
                        .as_array()
                        .ok_or_else(|| StoreError::new("$in expects an array"))?
                        .clone(),
                },
                other => {
                    return Err(StoreError::new(format!(
                        "unsupported operator {other} on field {field}"
                    )))
                }
            };
            conditions.push(condition);
        }

        Ok(match conditions.len() {
            1 => conditions.remove(0),
            _ => FilterCondition::And(conditions),
        })
    }

    /// Resolve a dotted path such as `profile.email`
    pub fn get_field_value<'a>(document: &'a Value, field: &str) -> Option<&'a Value> {
        field
            .split('.')
            .try_fold(document, |current, part| current.as_object()?.get(part))
    }

    fn field_equals(document: &Value, field: &str, expected: &Value) -> bool {
        match Self::get_field_value(document, field) {
            // An array field matches when any element does
            Some(Value::Array(items)) if !expected.is_array() => {
                items.iter().any(|item| values_equal(item, expected))
            }
            Some(actual) => values_equal(actual, expected),
            // A missing field only equals null
            None => expected.is_null(),
        }
    }

    fn matches_condition(condition: &FilterCondition, document: &Value) -> bool {
        match condition {
            FilterCondition::Equals { field, value } => Self::field_equals(document, field, value),
            FilterCondition::NotEquals { field, value } => !Self::field_equals(document, field, value),
            FilterCondition::In { field, values } => {
                values.iter().any(|value| Self::field_equals(document, field, value))
            }
            FilterCondition::And(conditions) => {
                conditions.iter().all(|c| Self::matches_condition(c, document))
            }
            FilterCondition::Or(conditions) => {
                conditions.iter().any(|c| Self::matches_condition(c, document))
            }
        }
    }
}

fn is_operator_document(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

impl Filter for DocumentFilter {
    fn matches(&self, document: &Value) -> bool {
        Self::matches_condition(&self.condition, document)
    }
}

use async_trait::async_trait;
use fieldguard_core::compiler::{COUNT_COLUMN, MATCHED_INDEX_COLUMN};
use fieldguard_core::{
    BackendError, BackendKind, ConditionNode, DocumentCompiler, DocumentOp, DocumentQuery,
    Error, ExistenceCheck, PhysicalQuery, QueryCompiler, RelationalCompiler, RelationalOutput, RelationalQuery,
    Result, SqlParam, StoreError,
};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One result row, keyed by column name
pub type Row = Map<String, Value>;

/// A store that runs parameterized SQL.
///
/// Templates use `??` for identifiers and `?` for values; `params` holds one
/// entry per placeholder, in order.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> std::result::Result<Vec<Row>, StoreError>;
}

/// A store that evaluates filter documents (`$and` / `$or` / `$ne` / `$in`)
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn count_documents(&self, collection: &str, filter: &Value) -> std::result::Result<u64, StoreError>;

    /// For each filter, in order, whether any document matches it
    async fn match_each(&self, collection: &str, filters: &[Value]) -> std::result::Result<Vec<bool>, StoreError>;
}

/// What a physical query produced
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Count(u64),
    /// One flag per requested value, in request order
    Matches(Vec<bool>),
}

/// The closed set of supported backends, chosen once per engine
#[derive(Clone)]
pub enum Backend {
    Relational(Arc<dyn RelationalStore>),
    Document(Arc<dyn DocumentStore>),
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}

impl Backend {
    pub fn relational<S: RelationalStore + 'static>(store: S) -> Self {
        Backend::Relational(Arc::new(store))
    }

    pub fn document<S: DocumentStore + 'static>(store: S) -> Self {
        Backend::Document(Arc::new(store))
    }

    #[inline]
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Relational(_) => BackendKind::Relational,
            Backend::Document(_) => BackendKind::Document,
        }
    }

    /// Count query for a whole check
    pub fn compile(&self, check: &ExistenceCheck) -> Result<PhysicalQuery> {
        Ok(match self {
            Backend::Relational(_) => PhysicalQuery::Relational(RelationalCompiler::new().compile(
                &check.collection,
                &check.conditions,
                &check.exclude,
            )?),
            Backend::Document(_) => PhysicalQuery::Document(DocumentCompiler::new().compile(
                &check.collection,
                &check.conditions,
                &check.exclude,
            )?),
        })
    }

    /// Set-membership query over `values` of one field
    pub fn compile_membership(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
        exclude: &[ConditionNode],
    ) -> Result<PhysicalQuery> {
        Ok(match self {
            Backend::Relational(_) => PhysicalQuery::Relational(
                RelationalCompiler::new().compile_membership(collection, field, values, exclude)?,
            ),
            Backend::Document(_) => PhysicalQuery::Document(
                DocumentCompiler::new().compile_membership(collection, field, values, exclude)?,
            ),
        })
    }

    /// Run a compiled query. Store failures come back as [`BackendError`].
    pub async fn execute(&self, query: &PhysicalQuery) -> Result<QueryOutcome> {
        match (self, query) {
            (Backend::Relational(store), PhysicalQuery::Relational(query)) => {
                Self::execute_relational(store.as_ref(), query).await
            }
            (Backend::Document(store), PhysicalQuery::Document(query)) => {
                Self::execute_document(store.as_ref(), query).await
            }
            _ => Err(Error::Configuration(format!(
                "query was compiled for a different backend than {}",
                self.kind()
            ))),
        }
    }

    async fn execute_relational(store: &dyn RelationalStore, query: &RelationalQuery) -> Result<QueryOutcome> {
        debug!(sql = %query.sql, params = query.params.len(), "relational query");
        let rows = store.query(&query.sql, &query.params).await?;

        if let RelationalOutput::MatchedIndices { values } = query.output {
            let mut matches = vec![false; values];
            for row in &rows {
                let index = row
                    .get(MATCHED_INDEX_COLUMN)
                    .and_then(read_count)
                    .ok_or_else(|| BackendError::Malformed(format!("row without numeric {MATCHED_INDEX_COLUMN} column")))?;
                let slot = usize::try_from(index)
                    .ok()
                    .and_then(|index| matches.get_mut(index))
                    .ok_or_else(|| BackendError::Malformed(format!("{MATCHED_INDEX_COLUMN} {index} out of range")))?;
                *slot = true;
            }
            return Ok(QueryOutcome::Matches(matches));
        }

        let row = rows
            .first()
            .ok_or_else(|| BackendError::Malformed("count query returned no rows".to_string()))?;
        let count = row
            .get(COUNT_COLUMN)
            .and_then(read_count)
            .ok_or_else(|| BackendError::Malformed(format!("row without numeric {COUNT_COLUMN} column")))?;
        Ok(QueryOutcome::Count(count))
    }

    async fn execute_document(store: &dyn DocumentStore, query: &DocumentQuery) -> Result<QueryOutcome> {
        debug!(collection = %query.collection, filter = %query.filter, "document query");
        match &query.op {
            DocumentOp::Count => Ok(QueryOutcome::Count(
                store.count_documents(&query.collection, &query.filter).await?,
            )),
            DocumentOp::MatchEach(filters) => {
                let matches = store.match_each(&query.collection, filters).await?;
                if matches.len() != filters.len() {
                    return Err(BackendError::Malformed(format!(
                        "expected {} match flags, store returned {}",
                        filters.len(),
                        matches.len()
                    ))
                    .into());
                }
                Ok(QueryOutcome::Matches(matches))
            }
        }
    }

    /// Number of records matching `check`
    pub async fn count(&self, check: &ExistenceCheck) -> Result<u64> {
        match self.execute(&self.compile(check)?).await? {
            QueryOutcome::Count(count) => Ok(count),
            QueryOutcome::Matches(_) => Err(BackendError::Malformed("expected a count".to_string()).into()),
        }
    }

    /// For each of `values`, whether a record with `field` equal to it
    /// exists (exclusion applied). Agrees with [`count`](Self::count) on the
    /// equivalent single-leaf check.
    pub async fn matching(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
        exclude: &[ConditionNode],
    ) -> Result<Vec<bool>> {
        let query = self.compile_membership(collection, field, values, exclude)?;
        match self.execute(&query).await? {
            QueryOutcome::Matches(matches) => Ok(matches),
            QueryOutcome::Count(_) => Err(BackendError::Malformed("expected match flags".to_string()).into()),
        }
    }
}

fn read_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        // Some drivers hand COUNT(*) back as a decimal string
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

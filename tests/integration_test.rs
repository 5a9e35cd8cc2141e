// Integration tests for fieldguard
use async_trait::async_trait;
use fieldguard::prelude::*;
use fieldguard::{rules, BackendError, RelationalCompiler, StoreError};
use fieldguard_core::SqlParam;
use fieldguard_storage::Row;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const SCHEMA: &str = "
    CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, email TEXT, active INTEGER);
    INSERT INTO users (id, username, email, active) VALUES
        (1, 'takenuser', 'taken@example.com', 1),
        (2, 'second', 'second@example.com', 0);
";

const ACCOUNTS_SCHEMA: &str = "
    CREATE TABLE accounts (id INTEGER PRIMARY KEY, handle TEXT COLLATE NOCASE, deleted_at TEXT);
    INSERT INTO accounts (id, handle, deleted_at) VALUES
        (2, 'Alice', NULL),
        (3, 'bob', '2024-01-01');
";

/// SQLite store that counts round trips
struct CountingSqlite {
    inner: SqliteStore,
    queries: AtomicUsize,
}

impl CountingSqlite {
    fn new(inner: SqliteStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            queries: AtomicUsize::new(0),
        })
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelationalStore for CountingSqlite {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> std::result::Result<Vec<Row>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql, params).await
    }
}

fn seeded_sqlite() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.execute_batch(SCHEMA).unwrap();
    store
}

#[tokio::test]
async fn test_sqlite_taken_username() {
    let engine = ExistenceEngine::new(Backend::relational(seeded_sqlite()));
    let check = ExistenceCheck::field("users", "username", "takenuser");

    assert!(engine.exists(&check).await.unwrap());
    assert!(!engine.unique(&check).await.unwrap());
    assert!(!engine.not_exists(&check).await.unwrap());
}

#[tokio::test]
async fn test_document_store_free_email() {
    let engine = ExistenceEngine::new(Backend::document(MemoryDocumentStore::new()));
    let check = ExistenceCheck::field("users", "email", "new@example.com");

    assert!(!engine.exists(&check).await.unwrap());
    assert!(engine.unique(&check).await.unwrap());
}

#[tokio::test]
async fn test_sqlite_file_batches_concurrent_checks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    SqliteStore::open(&path).unwrap().execute_batch(SCHEMA).unwrap();

    let store = CountingSqlite::new(SqliteStore::open(&path).unwrap());
    let engine = ExistenceEngine::new(Backend::Relational(store.clone()));

    let names = ["takenuser", "free1", "second", "free2", "takenuser"];
    let checks: Vec<_> = names
        .iter()
        .map(|name| ExistenceCheck::field("users", "username", *name))
        .collect();
    let answers: Vec<bool> = join_all(checks.iter().map(|check| engine.exists(check)))
        .await
        .into_iter()
        .map(|answer| answer.unwrap())
        .collect();

    assert_eq!(answers, vec![true, false, true, false, true]);
    assert_eq!(store.queries(), 1);

    // Every answer is cached now
    for check in &checks {
        engine.unique(check).await.unwrap();
    }
    assert_eq!(store.queries(), 1);
}

#[tokio::test]
async fn test_sqlite_tree_with_exclusion() {
    let store = CountingSqlite::new(seeded_sqlite());
    let engine = ExistenceEngine::new(Backend::Relational(store.clone()));

    let taken = |exclude_id: i64| {
        ExistenceCheck::tree(
            "users",
            vec![ConditionNode::group(vec![
                ConditionNode::leaf("username", "nobody"),
                ConditionNode::leaf("email", "taken@example.com").or(),
            ])],
        )
        .excluding(ConditionNode::leaf("id", exclude_id))
    };

    assert!(engine.exists(&taken(2)).await.unwrap());
    // The only match is the excluded record itself
    assert!(engine.unique(&taken(1)).await.unwrap());
    assert_eq!(store.queries(), 2);
}

#[tokio::test]
async fn test_sqlite_booleans_come_back_as_integers() {
    let engine = ExistenceEngine::new(Backend::relational(seeded_sqlite()));
    let checks = [
        ExistenceCheck::field("users", "active", true),
        ExistenceCheck::field("users", "active", 0),
    ];
    for answer in join_all(checks.iter().map(|check| engine.exists(check))).await {
        assert!(answer.unwrap());
    }
}

#[tokio::test]
async fn test_store_failure_is_backend_error() {
    let engine = ExistenceEngine::new(Backend::relational(SqliteStore::open_in_memory().unwrap()));
    let err = engine
        .exists(&ExistenceCheck::field("missing_table", "username", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Store(_))));
}

#[tokio::test]
async fn test_malformed_condition_never_reaches_sqlite() {
    let store = CountingSqlite::new(seeded_sqlite());
    let engine = ExistenceEngine::new(Backend::Relational(store.clone()));

    let check = ExistenceCheck::tree(
        "users",
        vec![ConditionNode::leaf("username", "a"), ConditionNode::default().or()],
    );
    let err = engine.exists(&check).await.unwrap_err();
    assert!(matches!(err, Error::Shape { .. }));
    assert_eq!(store.queries(), 0);
}

#[tokio::test]
async fn test_empty_values_skip_the_store() {
    let store = CountingSqlite::new(seeded_sqlite());
    let engine = ExistenceEngine::new(Backend::Relational(store.clone()));

    for value in [json!(""), json!(null)] {
        let check = ExistenceCheck::field("users", "username", value);
        assert!(!engine.exists(&check).await.unwrap());
        assert!(engine.unique(&check).await.unwrap());
    }
    assert_eq!(store.queries(), 0);
}

#[test]
fn test_relational_params_are_two_per_leaf() {
    let conditions = vec![
        ConditionNode::leaf("a", 1),
        ConditionNode::group(vec![
            ConditionNode::leaf("b", 2),
            ConditionNode::leaf("c", 3).or(),
            ConditionNode::group(vec![ConditionNode::leaf("d", 4)]),
        ]),
    ];
    let clause = RelationalCompiler::new().where_clause(&conditions, false).unwrap();
    assert_eq!(clause.params.len(), 8);
    assert_eq!(clause.sql.matches("??").count(), 4);
}

#[tokio::test]
async fn test_rules_with_constraint_spec() {
    let engine = ExistenceEngine::new(Backend::relational(seeded_sqlite()));
    let spec: ConstraintSpec = serde_json::from_value(json!({
        "collection": "users",
        "field": "email",
        "exclude": { "field": "id", "value": 1 }
    }))
    .unwrap();

    // Updating record 1 may keep its own email
    assert!(rules::unique(&json!("taken@example.com"), &spec, Some(&engine)).await.unwrap());
    assert!(!rules::unique(&json!("second@example.com"), &spec, Some(&engine)).await.unwrap());
    assert!(rules::exists(&json!("second@example.com"), &spec, Some(&engine)).await.unwrap());
    assert!(rules::not_exists(&json!("fresh@example.com"), &spec, Some(&engine)).await.unwrap());

    let missing = rules::unique(&json!("a"), &spec, None).await;
    assert!(matches!(missing, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_document_dump_end_to_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(
        &mut file,
        json!({ "users": [{ "id": 1, "username": "takenuser", "tags": ["admin"] }] })
            .to_string()
            .as_bytes(),
    )
    .unwrap();

    let engine = ExistenceEngine::builder()
        .backend(Backend::document(MemoryDocumentStore::from_json_file(file.path()).unwrap()))
        .config(EngineConfig {
            batch_window_ms: 5,
            ..EngineConfig::default()
        })
        .build()
        .unwrap();

    let checks = [
        ExistenceCheck::field("users", "username", "takenuser"),
        ExistenceCheck::field("users", "tags", "admin"),
        ExistenceCheck::field("users", "username", "takenuser").excluding(ConditionNode::leaf("id", 1)),
    ];
    let answers: Vec<bool> = join_all(checks.iter().map(|check| engine.exists(check)))
        .await
        .into_iter()
        .map(|answer| answer.unwrap())
        .collect();
    assert_eq!(answers, vec![true, true, false]);
    assert_eq!(engine.flushes(), 2);
}

/// Batched answers must equal what a lone count query says
async fn assert_batched_matches_count(backend: Backend, checks: &[ExistenceCheck], expected: &[bool]) {
    let engine = ExistenceEngine::new(backend.clone());
    let batched = join_all(checks.iter().map(|check| engine.exists(check))).await;
    for ((check, batched), expected) in checks.iter().zip(batched).zip(expected) {
        let counted = backend.count(check).await.unwrap() > 0;
        assert_eq!(counted, *expected, "count for {check:?}");
        assert_eq!(batched.unwrap(), counted, "batched answer for {check:?}");
    }
}

#[tokio::test]
async fn test_sqlite_batch_uses_column_affinity_and_collation() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.execute_batch(ACCOUNTS_SCHEMA).unwrap();
    let store = CountingSqlite::new(store);

    let checks = [
        ExistenceCheck::field("accounts", "id", "2"),
        ExistenceCheck::field("accounts", "id", 3),
        ExistenceCheck::field("accounts", "id", "4"),
        ExistenceCheck::field("accounts", "handle", "ALICE"),
        ExistenceCheck::field("accounts", "handle", "Bob"),
        ExistenceCheck::field("accounts", "handle", "carol"),
    ];
    assert_batched_matches_count(
        Backend::Relational(store.clone()),
        &checks,
        &[true, true, false, true, true, false],
    )
    .await;
    // Two field batches, then one count per check
    assert_eq!(store.queries(), 2 + checks.len());
}

#[tokio::test]
async fn test_document_batch_compares_array_values_whole() {
    let store = MemoryDocumentStore::new();
    store.insert("users", json!({ "id": 1, "roles": ["admin", "ops"] })).unwrap();

    let checks = [
        ExistenceCheck::field("users", "roles", json!(["admin", "ops"])),
        ExistenceCheck::field("users", "roles", json!(["admin"])),
        ExistenceCheck::field("users", "roles", "admin"),
        ExistenceCheck::field("users", "roles", "guest"),
    ];
    assert_batched_matches_count(Backend::document(store), &checks, &[true, false, true, false]).await;
}

#[tokio::test]
async fn test_null_exclusion_agrees_across_backends() {
    let sqlite = SqliteStore::open_in_memory().unwrap();
    sqlite.execute_batch(ACCOUNTS_SCHEMA).unwrap();
    let documents = MemoryDocumentStore::from_value(json!({ "accounts": [
        { "id": 2, "handle": "Alice", "deleted_at": null },
        { "id": 3, "handle": "bob", "deleted_at": "2024-01-01" },
    ]}))
    .unwrap();

    // Only soft-deleted rows count
    let deleted = |handle: &str| {
        ExistenceCheck::field("accounts", "handle", handle).excluding(ConditionNode::leaf("deleted_at", Value::Null))
    };
    let checks = [deleted("Alice"), deleted("bob")];
    let expected = [false, true];

    assert_batched_matches_count(Backend::relational(sqlite), &checks, &expected).await;
    assert_batched_matches_count(Backend::document(documents), &checks, &expected).await;
}

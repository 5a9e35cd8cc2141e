use crate::backend::DocumentStore;
use crate::collection::{CollectionConfig, DocumentCollection};
use ahash::AHashMap;
use async_trait::async_trait;
use fieldguard_core::{DocumentFilter, StoreError};
use parking_lot::RwLock;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// In-process document store: named collections of JSON documents
pub struct MemoryDocumentStore {
    collections: Arc<RwLock<AHashMap<String, Arc<DocumentCollection>>>>,
    queries_served: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(AHashMap::new())),
            queries_served: AtomicU64::new(0),
        }
    }

    /// Load `{ "<collection>": [ {..}, .. ], .. }` from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::with_source(format!("cannot read {}", path.display()), e))?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| StoreError::with_source(format!("invalid JSON in {}", path.display()), e))?;

        let store = Self::from_value(value)?;
        info!(
            path = %path.display(),
            collections = store.list_collections().len(),
            "document store loaded"
        );
        Ok(store)
    }

    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let Value::Object(map) = value else {
            return Err(StoreError::new("document dump must map collection names to arrays"));
        };

        let store = Self::new();
        for (name, documents) in map {
            let Value::Array(documents) = documents else {
                return Err(StoreError::new(format!("collection {name} must be an array")));
            };
            store.collection(&name).insert_many(documents)?;
        }
        Ok(store)
    }

    pub fn create_collection(&self, config: CollectionConfig) -> Result<Arc<DocumentCollection>, StoreError> {
        let name = config.name.clone();
        let mut collections = self.collections.write();

        if collections.contains_key(&name) {
            return Err(StoreError::new(format!("collection already exists: {name}")));
        }

        let collection = Arc::new(DocumentCollection::new(config));
        collections.insert(name, collection.clone());
        Ok(collection)
    }

    /// Get a collection, creating it when missing
    pub fn collection(&self, name: &str) -> Arc<DocumentCollection> {
        if let Some(collection) = self.get_collection(name) {
            return collection;
        }
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DocumentCollection::named(name)))
            .clone()
    }

    #[inline]
    pub fn get_collection(&self, name: &str) -> Option<Arc<DocumentCollection>> {
        self.collections.read().get(name).cloned()
    }

    pub fn delete_collection(&self, name: &str) -> bool {
        self.collections.write().remove(name).is_some()
    }

    #[inline]
    #[must_use]
    pub fn list_collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    #[inline]
    #[must_use]
    pub fn collection_exists(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    pub fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        self.collection(collection).insert(document)
    }

    /// Number of count/match calls answered so far
    pub fn queries_served(&self) -> u64 {
        self.queries_served.load(Ordering::Relaxed)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn count_documents(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        let filter = DocumentFilter::parse(filter)?;
        Ok(self
            .get_collection(collection)
            .map(|c| c.count_matching(&filter))
            .unwrap_or(0))
    }

    async fn match_each(&self, collection: &str, filters: &[Value]) -> Result<Vec<bool>, StoreError> {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        let filters = filters
            .iter()
            .map(DocumentFilter::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match self.get_collection(collection) {
            Some(c) => filters.iter().map(|filter| c.any_matching(filter)).collect(),
            None => vec![false; filters.len()],
        })
    }
}

use fieldguard_core::{DocumentFilter, Filter, StoreError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Configuration for a document collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    /// Field that must be present on every inserted document, if any
    #[serde(default)]
    pub required_field: Option<String>,
}

/// A named set of JSON documents
pub struct DocumentCollection {
    config: CollectionConfig,
    documents: Arc<RwLock<Vec<Value>>>,
}

impl DocumentCollection {
    pub fn new(config: CollectionConfig) -> Self {
        Self {
            config,
            documents: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(CollectionConfig {
            name: name.into(),
            required_field: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn count(&self) -> usize {
        self.documents.read().len()
    }

    /// Insert a document. Documents must be JSON objects.
    pub fn insert(&self, document: Value) -> Result<(), StoreError> {
        if !document.is_object() {
            return Err(StoreError::new(format!(
                "collection {}: documents must be JSON objects",
                self.config.name
            )));
        }
        if let Some(field) = &self.config.required_field {
            if DocumentFilter::get_field_value(&document, field).is_none() {
                return Err(StoreError::new(format!(
                    "collection {}: document is missing required field {field}",
                    self.config.name
                )));
            }
        }

        self.documents.write().push(document);
        Ok(())
    }

    /// Insert many documents, stopping at the first rejected one
    pub fn insert_many(&self, documents: Vec<Value>) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for document in documents {
            self.insert(document)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Delete documents matching `filter`, returning how many were removed
    pub fn delete_matching(&self, filter: &dyn Filter) -> usize {
        let mut documents = self.documents.write();
        let before = documents.len();
        documents.retain(|doc| !filter.matches(doc));
        before - documents.len()
    }

    pub fn count_matching(&self, filter: &dyn Filter) -> u64 {
        self.documents
            .read()
            .iter()
            .filter(|doc| filter.matches(doc))
            .count() as u64
    }

    pub fn any_matching(&self, filter: &dyn Filter) -> bool {
        self.documents.read().iter().any(|doc| filter.matches(doc))
    }

    pub fn clear(&self) {
        self.documents.write().clear();
    }

    /// Snapshot of all documents
    pub fn iter(&self) -> Vec<Value> {
        self.documents.read().clone()
    }
}

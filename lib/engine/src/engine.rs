use crate::batch::{with_timeout, BatchCoordinator};
use crate::cache::{CacheStats, EvictionPolicy, ResultCache};
use crate::config::EngineConfig;
use fieldguard_core::{is_empty_value, BackendKind, CheckSignature, Error, ExistenceCheck, Result};
use fieldguard_storage::Backend;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Answers existence and uniqueness questions against one backend.
///
/// Every check goes through the same pipeline: an empty condition list or
/// an empty driving value short-circuits to the permissive answer, the
/// condition shape is validated, the result cache is consulted, and misses
/// are submitted to a batch (or run directly when batching is off).
pub struct ExistenceEngine {
    backend: Backend,
    config: EngineConfig,
    cache: Arc<ResultCache>,
    coordinator: Arc<BatchCoordinator>,
}

impl fmt::Debug for ExistenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExistenceEngine")
            .field("backend", &self.backend.kind())
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl ExistenceEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine with the default configuration
    pub fn new(backend: Backend) -> Self {
        Self::assemble(backend, EngineConfig::default(), None)
    }

    fn assemble(backend: Backend, config: EngineConfig, policy: Option<Box<dyn EvictionPolicy>>) -> Self {
        let cache = Arc::new(match policy {
            Some(policy) => ResultCache::with_policy(policy),
            None => ResultCache::from_policy(&config.cache),
        });
        let coordinator = Arc::new(BatchCoordinator::new(
            backend.clone(),
            config.cache.enabled.then(|| cache.clone()),
            config.batch_window(),
            config.flush_timeout(),
        ));

        Self {
            backend,
            config,
            cache,
            coordinator,
        }
    }

    /// Does a record matching `check` exist? `false` when there is nothing
    /// to look for.
    pub async fn exists(&self, check: &ExistenceCheck) -> Result<bool> {
        Ok(self.evaluate(check).await?.unwrap_or(false))
    }

    /// Is the value free to use? `true` when there is nothing to look for.
    pub async fn unique(&self, check: &ExistenceCheck) -> Result<bool> {
        Ok(self.evaluate(check).await?.map_or(true, |found| !found))
    }

    /// Same answer as [`unique`](Self::unique)
    pub async fn not_exists(&self, check: &ExistenceCheck) -> Result<bool> {
        self.unique(check).await
    }

    /// `None` when the check short-circuits without a store call
    async fn evaluate(&self, check: &ExistenceCheck) -> Result<Option<bool>> {
        if check.conditions.is_empty() {
            trace!(collection = %check.collection, "no conditions, nothing to check");
            return Ok(None);
        }
        check.validate()?;
        if is_empty_value(check.driving_value()) {
            trace!(collection = %check.collection, "empty value, nothing to check");
            return Ok(None);
        }

        let signature = CheckSignature::for_check(self.backend.kind(), check);
        if self.config.cache.enabled {
            if let Some(found) = self.cache.lookup(&signature) {
                debug!(collection = %check.collection, found, "cache hit");
                return Ok(Some(found));
            }
        }

        let found = if self.config.batching {
            self.coordinator.submit(signature, check.clone()).await?
        } else {
            let found = with_timeout(self.config.flush_timeout(), self.backend.count(check)).await? > 0;
            if self.config.cache.enabled {
                self.cache.store(signature, found);
            }
            found
        };
        Ok(Some(found))
    }

    /// Forget cached answers for one collection, e.g. after writing to it
    pub fn invalidate_collection(&self, collection: &str) -> usize {
        let removed = self.cache.invalidate_collection(collection);
        debug!(collection, removed, "cache invalidated");
        removed
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Batch flushes that reached the backend so far
    pub fn flushes(&self) -> u64 {
        self.coordinator.flushes()
    }

    #[inline]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[derive(Default)]
pub struct EngineBuilder {
    backend: Option<Backend>,
    config: EngineConfig,
    eviction_policy: Option<Box<dyn EvictionPolicy>>,
}

impl EngineBuilder {
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the policy derived from `config.cache`
    pub fn eviction_policy<P: EvictionPolicy + 'static>(mut self, policy: P) -> Self {
        self.eviction_policy = Some(Box::new(policy));
        self
    }

    pub fn build(self) -> Result<ExistenceEngine> {
        let backend = self
            .backend
            .ok_or_else(|| Error::Configuration("no backend handle supplied".to_string()))?;
        Ok(ExistenceEngine::assemble(backend, self.config, self.eviction_policy))
    }
}

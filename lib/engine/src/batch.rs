//! Batch coordinator
//!
//! Concurrent cache misses that share a [`BatchKey`] are collected into one
//! queue. The submission that opens a queue leads it: inside its own future
//! it waits until a scheduler tick passes with no new entries (or for the
//! configured window), takes the queue out of the map and answers every entry
//! from one round trip per exclusion group. Submissions arriving after that
//! open a fresh queue. A leader dropped before answering hands its queue to
//! a spawned task so the other waiters still get a reply.

use crate::cache::ResultCache;
use ahash::AHashMap;
use fieldguard_core::{
    BackendError, BatchKey, CheckSignature, ConditionNode, Error, ExistenceCheck, Fingerprint, Result, Subject,
};
use fieldguard_storage::Backend;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Values compared per membership query
const MAX_VALUES_PER_QUERY: usize = 256;

/// Upper bound on scheduler ticks a zero-window leader waits for its queue
/// to stop growing
const MAX_GATHER_TICKS: usize = 16;

struct BatchEntry {
    signature: CheckSignature,
    check: ExistenceCheck,
    reply: oneshot::Sender<Result<bool>>,
}

struct ExclusionGroup<'a> {
    exclude: &'a [ConditionNode],
    values: Vec<Value>,
    positions: AHashMap<&'a Fingerprint, usize>,
}

pub struct BatchCoordinator {
    backend: Backend,
    cache: Option<Arc<ResultCache>>,
    window: Duration,
    timeout: Option<Duration>,
    queues: Mutex<AHashMap<BatchKey, Vec<BatchEntry>>>,
    flushes: AtomicU64,
}

impl BatchCoordinator {
    /// `cache` receives every answer of a successful flush; pass `None` to
    /// leave results uncached.
    pub fn new(
        backend: Backend,
        cache: Option<Arc<ResultCache>>,
        window: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            cache,
            window,
            timeout,
            queues: Mutex::new(AHashMap::new()),
            flushes: AtomicU64::new(0),
        }
    }

    /// Answer a check together with every concurrent check sharing its
    /// batch key.
    ///
    /// Submissions polled in the same scheduler turn (e.g. through
    /// `join_all`) share one flush on any runtime flavor. Must run inside a
    /// tokio runtime.
    pub async fn submit(self: &Arc<Self>, signature: CheckSignature, check: ExistenceCheck) -> Result<bool> {
        let key = signature.batch_key();
        let (reply, pending) = oneshot::channel();
        let entry = BatchEntry {
            signature,
            check,
            reply,
        };

        if self.enqueue(&key, entry) {
            trace!(?key, "opened batch");
            Flush::new(Arc::clone(self), key).run().await;
        }
        pending.await.map_err(|_| Error::Backend(BackendError::Abandoned))?
    }

    /// Number of flushes that reached the backend
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Queues still collecting
    pub fn open_batches(&self) -> usize {
        self.queues.lock().len()
    }

    /// `true` when the entry opened a new queue
    fn enqueue(&self, key: &BatchKey, entry: BatchEntry) -> bool {
        let mut queues = self.queues.lock();
        match queues.entry(key.clone()) {
            Entry::Occupied(mut queue) => {
                queue.get_mut().push(entry);
                trace!(queued = queue.get().len(), "joined open batch");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![entry]);
                true
            }
        }
    }

    fn queued(&self, key: &BatchKey) -> usize {
        self.queues.lock().get(key).map_or(0, Vec::len)
    }

    fn take(&self, key: &BatchKey) -> Vec<BatchEntry> {
        self.queues.lock().remove(key).unwrap_or_default()
    }

    async fn gather(&self, key: &BatchKey) {
        if !self.window.is_zero() {
            tokio::time::sleep(self.window).await;
            return;
        }

        let mut queued = self.queued(key);
        for _ in 0..MAX_GATHER_TICKS {
            tokio::task::yield_now().await;
            let now = self.queued(key);
            if now == queued {
                break;
            }
            queued = now;
        }
    }

    async fn settle(&self, key: &BatchKey, entries: &[BatchEntry]) -> Result<Vec<bool>> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(?key, size = entries.len(), "flushing batch");
        with_timeout(self.timeout, self.resolve(key, entries)).await
    }

    fn reply(&self, key: &BatchKey, entries: Vec<BatchEntry>, outcome: Result<Vec<bool>>) {
        match outcome {
            Ok(answers) => {
                for (entry, exists) in entries.into_iter().zip(answers) {
                    if let Some(cache) = &self.cache {
                        cache.store(entry.signature, exists);
                    }
                    let _ = entry.reply.send(Ok(exists));
                }
            }
            Err(err) => {
                warn!(?key, size = entries.len(), error = %err, "batch flush failed");
                for entry in entries {
                    let _ = entry.reply.send(Err(err.clone()));
                }
            }
        }
    }

    /// One answer per entry, in entry order
    async fn resolve(&self, key: &BatchKey, entries: &[BatchEntry]) -> Result<Vec<bool>> {
        match key {
            BatchKey::Check(_) => {
                let Some(first) = entries.first() else {
                    return Ok(Vec::new());
                };
                let found = self.backend.count(&first.check).await? > 0;
                Ok(vec![found; entries.len()])
            }
            BatchKey::Field {
                collection, field, ..
            } => self.resolve_field(collection, field, entries).await,
        }
    }

    async fn resolve_field(&self, collection: &str, field: &str, entries: &[BatchEntry]) -> Result<Vec<bool>> {
        let mut groups: Vec<ExclusionGroup<'_>> = Vec::new();
        let mut by_exclusion: AHashMap<&Fingerprint, usize> = AHashMap::new();
        let mut slots: Vec<(usize, usize)> = Vec::with_capacity(entries.len());

        for entry in entries {
            let (Subject::Field { value: fingerprint, .. }, Some((_, value))) =
                (&entry.signature.subject, entry.check.single_field())
            else {
                return Err(Error::shape("conditions", "field batch holds a check that is not a single leaf"));
            };

            let index = *by_exclusion.entry(&entry.signature.exclusion).or_insert_with(|| {
                groups.push(ExclusionGroup {
                    exclude: &entry.check.exclude,
                    values: Vec::new(),
                    positions: AHashMap::new(),
                });
                groups.len() - 1
            });

            let group = &mut groups[index];
            let position = *group.positions.entry(fingerprint).or_insert_with(|| {
                group.values.push(value.clone());
                group.values.len() - 1
            });
            slots.push((index, position));
        }

        let matched = try_join_all(groups.iter().map(|group| async move {
            let chunks = try_join_all(
                group
                    .values
                    .chunks(MAX_VALUES_PER_QUERY)
                    .map(|chunk| self.backend.matching(collection, field, chunk, group.exclude)),
            )
            .await?;
            Ok::<_, Error>(chunks.concat())
        }))
        .await?;

        Ok(slots.into_iter().map(|(index, position)| matched[index][position]).collect())
    }
}

/// The in-progress flush of one queue, owned by the submission that opened
/// it. Dropping it unsettled hands the queue to a spawned task.
struct Flush {
    coordinator: Arc<BatchCoordinator>,
    key: BatchKey,
    entries: Option<Vec<BatchEntry>>,
    settled: bool,
}

impl Flush {
    fn new(coordinator: Arc<BatchCoordinator>, key: BatchKey) -> Self {
        Self {
            coordinator,
            key,
            entries: None,
            settled: false,
        }
    }

    async fn run(mut self) {
        self.coordinator.gather(&self.key).await;

        let entries = self.entries.insert(self.coordinator.take(&self.key));
        let outcome = if entries.is_empty() {
            Ok(Vec::new())
        } else {
            self.coordinator.settle(&self.key, entries).await
        };

        let entries = self.entries.take().unwrap_or_default();
        self.coordinator.reply(&self.key, entries, outcome);
        self.settled = true;
    }
}

impl Drop for Flush {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let coordinator = Arc::clone(&self.coordinator);
        let key = self.key.clone();
        let taken = self.entries.take();

        match Handle::try_current() {
            Ok(handle) => {
                debug!(?key, "batch leader dropped, handing off flush");
                handle.spawn(async move {
                    let entries = taken.unwrap_or_else(|| coordinator.take(&key));
                    if entries.is_empty() {
                        return;
                    }
                    let outcome = coordinator.settle(&key, &entries).await;
                    coordinator.reply(&key, entries, outcome);
                });
            }
            Err(_) => {
                // Waiters see their reply channel close
                warn!(?key, "batch leader dropped outside a runtime, abandoning batch");
                if taken.is_none() {
                    coordinator.take(&key);
                }
            }
        }
    }
}

/// Bound a store call; expiry is a [`BackendError::Timeout`]
pub(crate) async fn with_timeout<T, F>(limit: Option<Duration>, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(BackendError::Timeout(limit).into())),
        None => call.await,
    }
}

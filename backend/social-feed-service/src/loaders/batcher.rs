//! Request-scoped key batcher (N+1 query prevention).
//!
//! Every `load(key)` issued while a batch is open joins that batch; the
//! batch is dispatched as a single [`BatchLoader::load`] call once it is
//! polled after a cooperative yield during which no caller joined it, or as
//! soon as it holds `max_batch_size` keys. Results are memoized for the
//! lifetime of the batcher, which is one request.
//!
//! ```text
//! load(a) ─┐
//! load(b) ─┼─> batch #0 {a, b} ──yield──> loader.load([a, b]) ──> a, b cached
//! load(a) ─┘   (deduplicated)
//! ```
//!
//! No task is spawned: the batch future is shared by all callers waiting on
//! it and is driven by whichever of them is polled.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::metrics::{LOADER_BATCHES_TOTAL, LOADER_BATCH_KEYS};

/// Default cap on keys per bulk fetch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Bulk fetch behind a [`KeyBatcher`].
///
/// Keys missing from the returned map resolve to `None`.
#[async_trait::async_trait]
pub trait BatchLoader: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Label for logs and metrics
    fn name(&self) -> &'static str;

    async fn load(&self, keys: &[Self::Key]) -> ServiceResult<HashMap<Self::Key, Self::Value>>;
}

#[derive(Clone)]
struct BatchOutput<K, V> {
    keys: Arc<Vec<K>>,
    fetched: Result<Arc<HashMap<K, V>>, ServiceError>,
}

type BatchFuture<K, V> = Shared<BoxFuture<'static, BatchOutput<K, V>>>;

struct PendingKeys<K> {
    keys: Vec<K>,
    /// Callers that joined, duplicates included
    joins: usize,
    sealed: bool,
}

struct OpenBatch<K, V> {
    id: u64,
    pending: Arc<Mutex<PendingKeys<K>>>,
    future: BatchFuture<K, V>,
}

enum Slot<K, V> {
    InFlight { batch_id: u64, batch: BatchFuture<K, V> },
    Ready(Option<V>),
}

struct BatcherState<K, V> {
    slots: HashMap<K, Slot<K, V>>,
    open: Option<OpenBatch<K, V>>,
    next_batch_id: u64,
}

/// Coalescing, memoizing front for a [`BatchLoader`].
///
/// Build one per request and drop it with the request. Cached values may be
/// viewer-relative, so an instance must never be shared across requests.
pub struct KeyBatcher<L: BatchLoader> {
    loader: Arc<L>,
    max_batch_size: usize,
    state: Mutex<BatcherState<L::Key, L::Value>>,
}

impl<L: BatchLoader> KeyBatcher<L> {
    pub fn new(loader: L) -> Self {
        Self::with_max_batch_size(loader, DEFAULT_MAX_BATCH_SIZE)
    }

    pub fn with_max_batch_size(loader: L, max_batch_size: usize) -> Self {
        Self {
            loader: Arc::new(loader),
            max_batch_size: max_batch_size.max(1),
            state: Mutex::new(BatcherState {
                slots: HashMap::new(),
                open: None,
                next_batch_id: 0,
            }),
        }
    }

    /// Resolve one key.
    ///
    /// `Ok(None)` means the store has no value for the key. If the bulk
    /// fetch fails, every caller waiting on that batch gets the same error
    /// and none of its keys stay cached.
    pub async fn load(&self, key: L::Key) -> ServiceResult<Option<L::Value>> {
        let (batch_id, batch) = {
            let mut state = self.state.lock();
            match state.slots.get(&key) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::InFlight { batch_id, batch }) => {
                    let joined = (*batch_id, batch.clone());
                    if let Some(open) = state.open.as_ref().filter(|o| o.id == joined.0) {
                        open.pending.lock().joins += 1;
                    }
                    joined
                }
                None => {
                    let (batch_id, batch) = self.enqueue(&mut state, key.clone());
                    state.slots.insert(
                        key.clone(),
                        Slot::InFlight {
                            batch_id,
                            batch: batch.clone(),
                        },
                    );
                    (batch_id, batch)
                }
            }
        };

        let output = batch.await;
        self.settle(batch_id, &output);

        match output.fetched {
            Ok(values) => Ok(values.get(&key).cloned()),
            Err(e) => Err(e),
        }
    }

    /// Resolve several keys in one burst
    pub async fn load_many(
        &self,
        keys: &[L::Key],
    ) -> ServiceResult<HashMap<L::Key, Option<L::Value>>> {
        let results = join_all(keys.iter().cloned().map(|key| async move {
            let value = self.load(key.clone()).await?;
            Ok::<_, ServiceError>((key, value))
        }))
        .await;

        results.into_iter().collect()
    }

    /// Number of keys with a cached result
    pub fn cached_len(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Add `key` to the open batch, or open a new one
    fn enqueue(
        &self,
        state: &mut BatcherState<L::Key, L::Value>,
        key: L::Key,
    ) -> (u64, BatchFuture<L::Key, L::Value>) {
        if let Some(open) = &state.open {
            let mut pending = open.pending.lock();
            if !pending.sealed && pending.keys.len() < self.max_batch_size {
                pending.keys.push(key);
                pending.joins += 1;
                return (open.id, open.future.clone());
            }
        }

        let id = state.next_batch_id;
        state.next_batch_id += 1;

        let pending = Arc::new(Mutex::new(PendingKeys {
            keys: vec![key],
            joins: 1,
            sealed: false,
        }));
        let future = dispatch(self.loader.clone(), pending.clone(), self.max_batch_size)
            .boxed()
            .shared();

        state.open = Some(OpenBatch {
            id,
            pending,
            future: future.clone(),
        });
        (id, future)
    }

    /// Replace this batch's in-flight slots with results, or drop them on failure
    fn settle(&self, batch_id: u64, output: &BatchOutput<L::Key, L::Value>) {
        let mut state = self.state.lock();
        for key in output.keys.iter() {
            let in_this_batch = matches!(
                state.slots.get(key),
                Some(Slot::InFlight { batch_id: id, .. }) if *id == batch_id
            );
            if !in_this_batch {
                continue;
            }
            match &output.fetched {
                Ok(values) => {
                    state
                        .slots
                        .insert(key.clone(), Slot::Ready(values.get(key).cloned()));
                }
                Err(_) => {
                    state.slots.remove(key);
                }
            }
        }
    }
}

/// Wait until a poll finds no caller joined since the previous one (or the
/// batch is full), seal the batch, then run the bulk fetch.
async fn dispatch<L: BatchLoader>(
    loader: Arc<L>,
    pending: Arc<Mutex<PendingKeys<L::Key>>>,
    max_batch_size: usize,
) -> BatchOutput<L::Key, L::Value> {
    let mut seen = 0;
    let keys = loop {
        {
            let mut batch = pending.lock();
            if batch.joins == seen || batch.keys.len() >= max_batch_size {
                batch.sealed = true;
                break std::mem::take(&mut batch.keys);
            }
            seen = batch.joins;
        }
        tokio::task::yield_now().await;
    };

    let name = loader.name();
    LOADER_BATCHES_TOTAL.with_label_values(&[name]).inc();
    LOADER_BATCH_KEYS
        .with_label_values(&[name])
        .observe(keys.len() as f64);
    debug!(loader = name, keys = keys.len(), "Dispatching batch");

    let fetched = loader.load(&keys).await.map(Arc::new);
    BatchOutput {
        keys: Arc::new(keys),
        fetched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Squares even numbers; odd numbers are absent
    #[derive(Default)]
    struct SquareLoader {
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<u32>>>,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl BatchLoader for Arc<SquareLoader> {
        type Key = u32;
        type Value = u64;

        fn name(&self) -> &'static str {
            "square"
        }

        async fn load(&self, keys: &[u32]) -> ServiceResult<HashMap<u32, u64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().push(keys.to_vec());
            if self.fail.load(Ordering::SeqCst) {
                return Err(ServiceError::TransientStore("boom".to_string()));
            }
            Ok(keys
                .iter()
                .filter(|k| *k % 2 == 0)
                .map(|k| (*k, u64::from(*k) * u64::from(*k)))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_fetch() {
        let source = Arc::new(SquareLoader::default());
        let batcher = KeyBatcher::new(source.clone());

        let keys = [2u32, 3, 4, 2, 4, 6, 2];
        let results = join_all(keys.iter().map(|k| batcher.load(*k))).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let mut fetched = source.batches.lock()[0].clone();
        fetched.sort_unstable();
        assert_eq!(fetched, vec![2, 3, 4, 6]);

        let values: Vec<Option<u64>> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            values,
            vec![Some(4), None, Some(16), Some(4), Some(16), Some(36), Some(4)]
        );
    }

    #[tokio::test]
    async fn test_resolved_keys_are_memoized() {
        let source = Arc::new(SquareLoader::default());
        let batcher = KeyBatcher::new(source.clone());

        assert_eq!(batcher.load(8).await.unwrap(), Some(64));
        assert_eq!(batcher.load(9).await.unwrap(), None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // absent is cached too
        assert_eq!(batcher.load(9).await.unwrap(), None);
        assert_eq!(batcher.load(8).await.unwrap(), Some(64));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(batcher.cached_len(), 2);
    }

    #[tokio::test]
    async fn test_max_batch_size_splits_burst() {
        let source = Arc::new(SquareLoader::default());
        let batcher = KeyBatcher::with_max_batch_size(source.clone(), 3);

        let keys: Vec<u32> = (0..7).collect();
        let resolved = batcher.load_many(&keys).await.unwrap();

        assert_eq!(resolved.len(), 7);
        let batches = source.batches.lock().clone();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 3));
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 7);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let source = Arc::new(SquareLoader::default());
        source.fail.store(true, Ordering::SeqCst);
        let batcher = KeyBatcher::new(source.clone());

        let results = join_all([2u32, 4, 2].iter().map(|k| batcher.load(*k))).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                ServiceError::TransientStore("boom".to_string())
            );
        }
        assert_eq!(batcher.cached_len(), 0);

        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(batcher.load(2).await.unwrap(), Some(4));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_loads_use_separate_batches() {
        let source = Arc::new(SquareLoader::default());
        let batcher = KeyBatcher::new(source.clone());

        batcher.load(2).await.unwrap();
        batcher.load(4).await.unwrap();

        assert_eq!(*source.batches.lock(), vec![vec![2], vec![4]]);
    }
}

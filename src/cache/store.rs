//! Per-kind result stores.
//!
//! A store maps an entity id to the last result it believes is valid together
//! with the hash of the input that produced it. Entries are only ever
//! overwritten; staleness is decided by comparing hashes, never by age.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use metrics::counter;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::Notify,
    task::{self, JoinHandle},
};
use tracing::{debug, warn};

use crate::domain::{ids::EntityId, kind::CalculationKind};

use super::{
    CacheError,
    hasher::InputHash,
    lock,
    persist::{FlushPolicy, PersistenceBackend},
};

const STORE_FORMAT_VERSION: u32 = 1;
pub(crate) const METRIC_FLUSH_FAILURE: &str = "furrow_cache_flush_failure_total";

/// Bounds required of anything kept in a cache store.
pub trait CachedResult: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CachedResult for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Last known result for one entity, tagged with the producing input hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry<T> {
    pub result: T,
    pub input_hash: InputHash,
}

#[derive(Serialize, Deserialize)]
struct PersistedSlots<T> {
    format: u32,
    kind: CalculationKind,
    entries: BTreeMap<EntityId, CachedEntry<T>>,
}

pub struct CacheStore<T> {
    kind: CalculationKind,
    entries: RwLock<HashMap<EntityId, CachedEntry<T>>>,
    backend: Arc<dyn PersistenceBackend>,
    policy: FlushPolicy,
    dirty: AtomicBool,
    flushing: Mutex<()>,
    wake: Arc<Notify>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: CachedResult> CacheStore<T> {
    /// Open the store for `kind`, restoring whatever the backend holds.
    ///
    /// Unreadable blobs are discarded with a warning: the worst outcome is one
    /// recomputation per entity.
    pub(crate) fn open(
        kind: CalculationKind,
        backend: Arc<dyn PersistenceBackend>,
        policy: FlushPolicy,
    ) -> Result<Arc<Self>, CacheError> {
        let entries = match backend.load(kind.namespace())? {
            Some(bytes) => decode_slots::<T>(kind, &bytes),
            None => HashMap::new(),
        };

        debug!(
            target = "furrow::cache::store",
            kind = %kind,
            entries = entries.len(),
            policy = ?policy,
            "Cache store opened"
        );

        let store = Arc::new(Self {
            kind,
            entries: RwLock::new(entries),
            backend,
            policy,
            dirty: AtomicBool::new(false),
            flushing: Mutex::new(()),
            wake: Arc::new(Notify::new()),
            flusher: Mutex::new(None),
        });

        if let FlushPolicy::Debounced(delay) = policy {
            store.start_flusher(delay);
        }

        Ok(store)
    }

    pub fn kind(&self) -> CalculationKind {
        self.kind
    }

    pub fn get(&self, id: &EntityId) -> Option<CachedEntry<T>> {
        lock::read(&self.entries, self.kind, "get").get(id).cloned()
    }

    /// Recorded input hash for `id`, without cloning the result.
    pub fn input_hash(&self, id: &EntityId) -> Option<InputHash> {
        lock::read(&self.entries, self.kind, "input_hash")
            .get(id)
            .map(|entry| entry.input_hash.clone())
    }

    /// Unconditional upsert. Last write wins.
    ///
    /// Under [`FlushPolicy::Eager`] the backend write happens before this
    /// returns. On a multi-thread runtime it runs through
    /// [`task::block_in_place`] so the worker's other tasks move elsewhere.
    pub fn set(&self, id: EntityId, entry: CachedEntry<T>) {
        debug!(
            target = "furrow::cache::store",
            kind = %self.kind,
            entity = %id,
            input_hash = entry.input_hash.short(),
            "Cache slot written"
        );
        lock::write(&self.entries, self.kind, "set").insert(id, entry);
        self.dirty.store(true, Ordering::SeqCst);

        match self.policy {
            FlushPolicy::Eager => run_blocking(|| self.flush_logged("eager")),
            FlushPolicy::Debounced(_) => self.wake.notify_one(),
        }
    }

    pub fn len(&self) -> usize {
        lock::read(&self.entries, self.kind, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every slot ordered by entity id.
    pub fn entries(&self) -> Vec<(EntityId, CachedEntry<T>)> {
        let mut entries: Vec<_> = lock::read(&self.entries, self.kind, "entries")
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        entries
    }

    /// Write the current slots to the backend if anything changed.
    ///
    /// Flushes are serialized: a snapshot is always written before any
    /// snapshot taken after it. Blocking; async callers go through
    /// [`task::spawn_blocking`] or [`task::block_in_place`].
    pub fn flush(&self) -> Result<(), CacheError> {
        let _flushing = lock::lock(&self.flushing, self.kind, "flush");
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let slots = PersistedSlots {
            format: STORE_FORMAT_VERSION,
            kind: self.kind,
            entries: lock::read(&self.entries, self.kind, "flush")
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect::<BTreeMap<_, _>>(),
        };

        let bytes = serde_json::to_vec(&slots).map_err(|err| CacheError::Encode {
            namespace: self.kind.namespace(),
            message: err.to_string(),
        });
        let result = bytes.and_then(|bytes| self.backend.store(self.kind.namespace(), &bytes));
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }

    fn flush_logged(&self, trigger: &'static str) {
        if let Err(err) = self.flush() {
            counter!(METRIC_FLUSH_FAILURE, "kind" => self.kind.as_str()).increment(1);
            warn!(
                target = "furrow::cache::store",
                op = "flush",
                kind = %self.kind,
                trigger,
                result = "error",
                error = %err,
                "Cache store flush failed; will retry on next write"
            );
        }
    }

    fn start_flusher(self: &Arc<Self>, delay: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                target = "furrow::cache::store",
                kind = %self.kind,
                "No async runtime available; debounced writes stay in memory until flush()"
            );
            return;
        };

        let store: Weak<Self> = Arc::downgrade(self);
        let wake = Arc::clone(&self.wake);
        let handle = runtime.spawn(async move {
            loop {
                wake.notified().await;
                tokio::time::sleep(delay).await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let kind = store.kind;
                let flushed = task::spawn_blocking(move || store.flush_logged("debounced")).await;
                if let Err(err) = flushed {
                    warn!(
                        target = "furrow::cache::store",
                        op = "flush",
                        kind = %kind,
                        trigger = "debounced",
                        error = %err,
                        "Debounced cache flush task did not complete"
                    );
                }
            }
        });
        *lock::lock(&self.flusher, self.kind, "start_flusher") = Some(handle);
    }
}

impl<T> Drop for CacheStore<T> {
    fn drop(&mut self) {
        let flusher = match self.flusher.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = flusher {
            handle.abort();
        }
    }
}

fn run_blocking(write: impl FnOnce()) {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            task::block_in_place(write);
        }
        _ => write(),
    }
}

fn decode_slots<T: CachedResult>(
    kind: CalculationKind,
    bytes: &[u8],
) -> HashMap<EntityId, CachedEntry<T>> {
    match serde_json::from_slice::<PersistedSlots<T>>(bytes) {
        Ok(slots) if slots.format == STORE_FORMAT_VERSION && slots.kind == kind => {
            slots.entries.into_iter().collect()
        }
        Ok(slots) => {
            warn!(
                target = "furrow::cache::store",
                kind = %kind,
                stored_kind = %slots.kind,
                stored_format = slots.format,
                result = "discarded",
                "Persisted cache store has an unexpected shape; starting empty"
            );
            HashMap::new()
        }
        Err(err) => {
            warn!(
                target = "furrow::cache::store",
                kind = %kind,
                error = %err,
                result = "discarded",
                "Persisted cache store is unreadable; starting empty"
            );
            HashMap::new()
        }
    }
}

/// Type-erased view of a store held by the factory.
trait OpenedStore: Send + Sync {
    fn flush(&self) -> Result<(), CacheError>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: CachedResult> OpenedStore for CacheStore<T> {
    fn flush(&self) -> Result<(), CacheError> {
        CacheStore::flush(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Constructs one store per calculation kind over a shared backend.
pub struct CacheStoreFactory {
    backend: Arc<dyn PersistenceBackend>,
    policy: FlushPolicy,
    stores: DashMap<CalculationKind, Arc<dyn OpenedStore>>,
}

impl CacheStoreFactory {
    pub fn new(backend: Arc<dyn PersistenceBackend>, policy: FlushPolicy) -> Self {
        Self {
            backend,
            policy,
            stores: DashMap::new(),
        }
    }

    /// Open (or return the already opened) store for `kind`.
    pub fn open<T: CachedResult>(
        &self,
        kind: CalculationKind,
    ) -> Result<Arc<CacheStore<T>>, CacheError> {
        match self.stores.entry(kind) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get())
                .into_any()
                .downcast::<CacheStore<T>>()
                .map_err(|_| CacheError::KindTypeMismatch { kind }),
            Entry::Vacant(vacant) => {
                let store = CacheStore::<T>::open(kind, Arc::clone(&self.backend), self.policy)?;
                vacant.insert(Arc::clone(&store) as Arc<dyn OpenedStore>);
                Ok(store)
            }
        }
    }

    /// Flush every opened store. All stores are attempted; the first error is
    /// returned.
    pub fn flush_all(&self) -> Result<(), CacheError> {
        let mut first_error = None;
        for store in self.stores.iter() {
            if let Err(err) = store.value().flush() {
                warn!(
                    target = "furrow::cache::store",
                    op = "flush_all",
                    kind = %store.key(),
                    error = %err,
                    "Cache store flush failed during shutdown"
                );
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

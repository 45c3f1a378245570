use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheStore, CachedEntry, CachedResult, location_of, with_cache_hash},
    domain::kind::CalculationKind,
};

use super::{
    deferred::{DeferredState, LoadFailure, Resolution},
    generation::{Generation, NavigationTracker},
    loader::Navigation,
};

pub(crate) const METRIC_STALE_DROPPED: &str = "furrow_stale_resolution_dropped_total";
pub(crate) const METRIC_CACHE_MISS: &str = "furrow_render_cache_miss_total";

/// What the page shows for a calculation slot.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedView<T> {
    /// Still loading; the fallback is on screen.
    Pending,
    /// The stored entry was confirmed valid without recomputing.
    Cached(CachedEntry<T>),
    /// Computed during this navigation and written to the store.
    Fresh(CachedEntry<T>),
    /// The URL vouched for an entry the store no longer holds. The client
    /// should reload `location`, which carries no hash.
    CacheMiss { location: String },
    Failed(LoadFailure),
    /// Computed for a load that a later one superseded. Shown to its own
    /// requester; the store write belongs to the later load.
    Detached(CachedEntry<T>),
}

impl<T> RenderedView<T> {
    pub fn entry(&self) -> Option<&CachedEntry<T>> {
        match self {
            Self::Cached(entry) | Self::Fresh(entry) | Self::Detached(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Turns settled loads into views and performs the single store write for
/// fresh results.
pub struct Renderer<T> {
    kind: CalculationKind,
    tracker: Arc<NavigationTracker>,
    _result: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for Renderer<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            tracker: Arc::clone(&self.tracker),
            _result: std::marker::PhantomData,
        }
    }
}

impl<T: CachedResult> Renderer<T> {
    pub fn new(kind: CalculationKind, tracker: Arc<NavigationTracker>) -> Self {
        Self {
            kind,
            tracker,
            _result: std::marker::PhantomData,
        }
    }

    /// Render `state` for the load started at `generation`.
    ///
    /// May run any number of times for the same state; the store sees at most
    /// one write per fresh value, and none once a later load of the same slot
    /// has begun. Without a persistent store (speculative loads, cache
    /// disabled) results are shown but never written.
    pub fn render(
        &self,
        store: Option<&CacheStore<T>>,
        navigation: &Navigation,
        generation: Generation,
        state: &DeferredState<T>,
    ) -> RenderedView<T> {
        match state {
            DeferredState::Pending => RenderedView::Pending,
            DeferredState::Failed(failure) => RenderedView::Failed(failure.clone()),
            DeferredState::Resolved(resolution) => match resolution.as_ref() {
                Resolution::CacheAuthoritative { input_hash } => {
                    let stored = store
                        .and_then(|store| store.get(&navigation.entity))
                        .filter(|entry| &entry.input_hash == input_hash);
                    match stored {
                        Some(entry) => RenderedView::Cached(entry),
                        None => self.cache_miss(navigation),
                    }
                }
                Resolution::Fresh(fresh) => {
                    let entry = CachedEntry {
                        result: fresh.result.clone(),
                        input_hash: fresh.input_hash.clone(),
                    };
                    if !self.tracker.is_current(self.kind, &navigation.entity, generation) {
                        counter!(METRIC_STALE_DROPPED, "kind" => self.kind.as_str()).increment(1);
                        debug!(
                            target = "furrow::calculation::renderer",
                            kind = %self.kind,
                            entity = %navigation.entity,
                            generation = generation.get(),
                            "Superseded load; skipping the store write"
                        );
                        return RenderedView::Detached(entry);
                    }
                    if let Some(store) = store
                        && fresh.claim_commit()
                    {
                        store.set(navigation.entity.clone(), entry.clone());
                    }
                    RenderedView::Fresh(entry)
                }
            },
        }
    }

    fn cache_miss(&self, navigation: &Navigation) -> RenderedView<T> {
        counter!(METRIC_CACHE_MISS, "kind" => self.kind.as_str()).increment(1);
        warn!(
            target = "furrow::calculation::renderer",
            kind = %self.kind,
            entity = %navigation.entity,
            "URL hash matches the input but the store has no such entry"
        );
        let location = location_of(&with_cache_hash(&navigation.url, None));
        info!(
            target = "furrow::calculation::renderer",
            location = %location,
            "Requesting a recompute"
        );
        RenderedView::CacheMiss { location }
    }
}

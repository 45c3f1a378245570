use std::{sync::Arc, time::Instant};

use metrics::{counter, histogram};
use tracing::{Instrument, debug, error, info_span, warn};
use url::Url;

use crate::{
    cache::{CalculationInput, hash_input},
    domain::{ids::EntityId, kind::CalculationKind},
};

use super::{
    deferred::{Deferred, DeferredState, FreshResult, LoadFailure, Resolution},
    engine::{CalculationEngine, CalculationError},
    generation::{Generation, NavigationTracker},
};

pub(crate) const METRIC_SHORT_CIRCUIT: &str = "furrow_loader_short_circuit_total";
pub(crate) const METRIC_COMPUTE: &str = "furrow_engine_compute_total";
pub(crate) const METRIC_FAILURE: &str = "furrow_engine_failure_total";
pub(crate) const METRIC_COMPUTE_MS: &str = "furrow_engine_compute_ms";

/// A navigation to a calculation route that passed the coherence check.
#[derive(Debug, Clone)]
pub struct Navigation {
    pub entity: EntityId,
    pub url: Url,
}

impl Navigation {
    pub fn new(entity: EntityId, url: Url) -> Self {
        Self { entity, url }
    }

    /// The hash the URL claims is valid, if any.
    pub fn cache_hash(&self) -> Option<String> {
        crate::cache::cache_hash_of(&self.url)
    }
}

/// Starts loads for one calculation kind.
pub struct Loader<E> {
    engine: Arc<E>,
    tracker: Arc<NavigationTracker>,
}

impl<E> Clone for Loader<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            tracker: Arc::clone(&self.tracker),
        }
    }
}

impl<E: CalculationEngine> Loader<E> {
    pub fn new(engine: Arc<E>, tracker: Arc<NavigationTracker>) -> Self {
        Self { engine, tracker }
    }

    pub fn kind(&self) -> CalculationKind {
        E::Input::KIND
    }

    /// Begin loading and return at once; the shell can render around the
    /// pending handle.
    pub fn load(&self, navigation: &Navigation) -> Deferred<E::Output> {
        let kind = self.kind();
        let generation = self.tracker.begin(kind, &navigation.entity);
        let engine = Arc::clone(&self.engine);
        let entity = navigation.entity.clone();
        let claimed = navigation.cache_hash();

        let span = info_span!(
            "calculation.load",
            kind = %kind,
            entity = %entity,
            generation = generation.get()
        );
        Deferred::spawn(
            generation,
            async move { reconcile_load(engine.as_ref(), &entity, claimed.as_deref(), generation).await }
                .instrument(span),
        )
    }
}

async fn reconcile_load<E: CalculationEngine>(
    engine: &E,
    entity: &EntityId,
    claimed: Option<&str>,
    generation: Generation,
) -> DeferredState<E::Output> {
    let kind = E::Input::KIND;

    let input = match engine.collect_input(entity).await {
        Ok(input) => input,
        Err(err) => return engine_failure(kind, "collect_input", err),
    };

    let input_hash = match hash_input(&input) {
        Ok(hash) => hash,
        Err(err) => {
            error!(
                target = "furrow::calculation::loader",
                kind = %kind,
                entity = %entity,
                error = %err,
                "Calculation input type cannot be hashed"
            );
            return DeferredState::Failed(LoadFailure::Programmer(err.to_string()));
        }
    };

    if claimed == Some(input_hash.as_str()) {
        counter!(METRIC_SHORT_CIRCUIT, "kind" => kind.as_str()).increment(1);
        debug!(
            target = "furrow::calculation::loader",
            input_hash = input_hash.short(),
            outcome = "cache_authoritative",
            "Input unchanged; skipping engine"
        );
        return DeferredState::Resolved(Arc::new(Resolution::CacheAuthoritative { input_hash }));
    }

    counter!(METRIC_COMPUTE, "kind" => kind.as_str()).increment(1);
    let started_at = Instant::now();
    let computed = engine.compute(&input).await;
    histogram!(METRIC_COMPUTE_MS, "kind" => kind.as_str())
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

    match computed {
        Ok(result) => {
            debug!(
                target = "furrow::calculation::loader",
                input_hash = input_hash.short(),
                claimed = claimed.unwrap_or("absent"),
                generation = generation.get(),
                outcome = "fresh",
                "Calculation computed"
            );
            DeferredState::Resolved(Arc::new(Resolution::Fresh(FreshResult::new(
                result, input_hash,
            ))))
        }
        Err(err) => engine_failure(kind, "compute", err),
    }
}

fn engine_failure<T>(
    kind: CalculationKind,
    op: &'static str,
    err: CalculationError,
) -> DeferredState<T> {
    counter!(METRIC_FAILURE, "kind" => kind.as_str(), "code" => err.code()).increment(1);
    warn!(
        target = "furrow::calculation::loader",
        op,
        kind = %kind,
        error_code = err.code(),
        error = %err,
        "Calculation engine rejected the request"
    );
    DeferredState::Failed(LoadFailure::Calculation(err))
}

//! Calculation pages: the shell streams before the engine settles.

use std::{convert::Infallible, sync::Arc};

use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        HeaderMap, HeaderValue, StatusCode, Uri,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::error;

use crate::{
    application::{
        calculation::{CalculationEngine, Loader, Navigation, NavigationTracker, Renderer},
        error::HttpError,
    },
    cache::{
        CacheError, CacheStoreFactory, CalculationInput, CoherenceError, CoherenceLayer,
        IdExtractor, StoreAccessor, navigation_url, with_cache_hash,
    },
    domain::ids::EntityId,
    presentation::views::{ResultPresenter, render_page_end, render_shell, render_view},
};

use super::HttpState;

const SOURCE: &str = "infra::http::calculations";
const RENDER_FAILURE_HTML: &str =
    "<section class=\"failure\" role=\"alert\"><p>The result could not be displayed.</p></section>";

/// Everything one calculation route needs: the loader, renderer and store
/// accessor all share one tracker per process.
pub struct CalculationRoute<E: CalculationEngine> {
    loader: Loader<E>,
    renderer: Renderer<E::Output>,
    store: StoreAccessor<E::Output>,
}

impl<E: CalculationEngine> Clone for CalculationRoute<E> {
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            renderer: self.renderer.clone(),
            store: self.store.clone(),
        }
    }
}

impl<E: CalculationEngine> CalculationRoute<E> {
    pub fn new(
        engine: Arc<E>,
        tracker: Arc<NavigationTracker>,
        store: StoreAccessor<E::Output>,
    ) -> Self {
        let kind = E::Input::KIND;
        Self {
            loader: Loader::new(engine, Arc::clone(&tracker)),
            renderer: Renderer::new(kind, tracker),
            store,
        }
    }

    /// Route for `engine` backed by the factory's store, or by none when the
    /// cache is disabled.
    pub fn open(
        engine: Arc<E>,
        tracker: Arc<NavigationTracker>,
        stores: &CacheStoreFactory,
        cache_enabled: bool,
    ) -> Result<Self, CacheError> {
        let store = if cache_enabled {
            StoreAccessor::persistent(stores.open::<E::Output>(E::Input::KIND)?)
        } else {
            StoreAccessor::unavailable()
        };
        Ok(Self::new(engine, tracker, store))
    }

    pub fn coherence(
        &self,
        pattern: &str,
        id: IdExtractor,
    ) -> Result<CoherenceLayer<E::Output>, CoherenceError> {
        CoherenceLayer::new(E::Input::KIND, pattern, self.store.clone(), id)
    }
}

pub(super) async fn nitrogen_balance_page(
    State(state): State<HttpState>,
    Path(field_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    calculation_page(&state.nitrogen_balance, EntityId::new(field_id), &uri, &headers)
}

pub(super) async fn norm_filling_page(
    State(state): State<HttpState>,
    Path(farm_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    calculation_page(&state.norm_filling, EntityId::new(farm_id), &uri, &headers)
}

fn calculation_page<E>(
    route: &CalculationRoute<E>,
    entity: EntityId,
    uri: &Uri,
    headers: &HeaderMap,
) -> Response
where
    E: CalculationEngine,
    E::Output: ResultPresenter,
{
    let url = match navigation_url(uri) {
        Ok(url) => url,
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid calculation URL",
                &err,
            )
            .into_response();
        }
    };
    let (shell, page_end) = match (render_shell::<E::Output>(&entity), render_page_end()) {
        (Ok(shell), Ok(page_end)) => (shell, page_end),
        (Err(err), _) | (_, Err(err)) => return HttpError::from(err).into_response(),
    };

    let store = route.store.resolve(headers);
    // Without a store the URL's hash vouches for nothing.
    let url = if store.is_some() {
        url
    } else {
        with_cache_hash(&url, None)
    };
    let navigation = Navigation::new(entity, url);
    let mut deferred = route.loader.load(&navigation);
    let renderer = route.renderer.clone();

    let body = stream! {
        yield Ok::<Bytes, Infallible>(Bytes::from(shell));

        let state = deferred.settled().await;
        let view = renderer.render(store.as_deref(), &navigation, deferred.generation(), &state);
        match render_view(&view) {
            Ok(Some(html)) => yield Ok(Bytes::from(html)),
            Ok(None) => {}
            Err(err) => {
                error!(
                    target = "furrow::http::calculations",
                    entity = %navigation.entity,
                    error = %err,
                    "Failed to render calculation view"
                );
                yield Ok(Bytes::from_static(RENDER_FAILURE_HTML.as_bytes()));
            }
        }

        yield Ok(Bytes::from(page_end));
    };

    (
        StatusCode::OK,
        [
            (
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            ),
            (CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        application::calculation::testing::StubEngine,
        cache::{CachedEntry, FlushPolicy, MemoryBackend},
        domain::kind::CalculationKind,
        presentation::views::{Provenance, TemplateRenderError},
    };

    impl ResultPresenter for u64 {
        const TITLE: &'static str = "Stub";
        const ENTITY_LABEL: &'static str = "Entity";

        fn render_entry(
            entry: &CachedEntry<Self>,
            provenance: Provenance,
        ) -> Result<String, TemplateRenderError> {
            Ok(format!(
                "<output data-provenance=\"{}\">{}</output>",
                provenance.label(),
                entry.result
            ))
        }
    }

    #[tokio::test]
    async fn shell_streams_before_the_engine_settles() {
        let gate = Arc::new(Semaphore::new(0));
        let stores = CacheStoreFactory::new(Arc::new(MemoryBackend::new()), FlushPolicy::Eager);
        let store = stores
            .open::<u64>(CalculationKind::NitrogenBalance)
            .unwrap();
        let route = CalculationRoute::new(
            Arc::new(StubEngine::gated(Arc::clone(&gate))),
            Arc::new(NavigationTracker::new()),
            StoreAccessor::persistent(Arc::clone(&store)),
        );

        let uri: Uri = "/fields/f1/nitrogen-balance".parse().unwrap();
        let response = calculation_page(&route, EntityId::from("f1"), &uri, &HeaderMap::new());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");

        let mut chunks = response.into_body().into_data_stream();
        let shell = chunks.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&shell).contains("calculation-fallback"));
        assert!(store.is_empty());

        gate.add_permits(1);
        let mut rest = String::new();
        while let Some(chunk) = chunks.next().await {
            rest.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
        }
        assert!(rest.contains("<output data-provenance=\"fresh\">0</output>"), "{rest}");
        assert!(rest.trim_end().ends_with("</html>"), "{rest}");
        assert_eq!(store.get(&EntityId::from("f1")).map(|entry| entry.result), Some(0));
    }

    #[tokio::test]
    async fn speculative_requests_drop_the_claimed_hash() {
        let stores = CacheStoreFactory::new(Arc::new(MemoryBackend::new()), FlushPolicy::Eager);
        let store = stores
            .open::<u64>(CalculationKind::NitrogenBalance)
            .unwrap();
        let route = CalculationRoute::new(
            Arc::new(StubEngine::default()),
            Arc::new(NavigationTracker::new()),
            StoreAccessor::persistent(Arc::clone(&store)),
        );

        let mut headers = HeaderMap::new();
        headers.insert("purpose", HeaderValue::from_static("prefetch"));
        let uri: Uri = "/fields/f1/nitrogen-balance?cacheHash=deadbeef".parse().unwrap();
        let response = calculation_page(&route, EntityId::from("f1"), &uri, &headers);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("data-provenance=\"fresh\""), "{body}");
        assert!(store.is_empty());
    }
}

mod calculations;
mod middleware;

pub use calculations::CalculationRoute;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{
        calculation::NavigationTracker,
        engines::{NitrogenBalance, NitrogenBalanceEngine, NormFilling, NormFillingEngine},
        error::HttpError,
        repos::FarmDataRepo,
    },
    cache::{CacheError, CacheStoreFactory, CoherenceError, IdExtractor, coherence_layer},
};

use self::{
    calculations::{nitrogen_balance_page, norm_filling_page},
    middleware::{log_responses, set_request_context},
};

pub const NITROGEN_BALANCE_ROUTE: &str = "/fields/{field_id}/nitrogen-balance";
pub const NORM_FILLING_ROUTE: &str = "/farms/{farm_id}/norm-filling";

#[derive(Clone)]
pub struct HttpState {
    pub nitrogen_balance: CalculationRoute<NitrogenBalanceEngine>,
    pub norm_filling: CalculationRoute<NormFillingEngine>,
}

impl HttpState {
    /// Wire both calculation kinds to `repo`, sharing one navigation tracker.
    pub fn new(
        repo: Arc<dyn FarmDataRepo>,
        stores: &CacheStoreFactory,
        cache_enabled: bool,
    ) -> Result<Self, CacheError> {
        let tracker = Arc::new(NavigationTracker::new());
        Ok(Self {
            nitrogen_balance: CalculationRoute::open(
                Arc::new(NitrogenBalanceEngine::new(Arc::clone(&repo))),
                Arc::clone(&tracker),
                stores,
                cache_enabled,
            )?,
            norm_filling: CalculationRoute::open(
                Arc::new(NormFillingEngine::new(repo)),
                tracker,
                stores,
                cache_enabled,
            )?,
        })
    }
}

/// Build the service router. Matcher patterns are validated here so a broken
/// route fails at startup.
pub fn build_router(state: HttpState) -> Result<Router, CoherenceError> {
    let nitrogen_coherence = state
        .nitrogen_balance
        .coherence(NITROGEN_BALANCE_ROUTE, IdExtractor::param("field_id"))?;
    let norm_coherence = state
        .norm_filling
        .coherence(NORM_FILLING_ROUTE, IdExtractor::param("farm_id"))?;

    let nitrogen_routes = Router::new()
        .route(NITROGEN_BALANCE_ROUTE, get(nitrogen_balance_page))
        .route_layer(from_fn_with_state(
            nitrogen_coherence,
            coherence_layer::<NitrogenBalance>,
        ));
    let norm_routes = Router::new()
        .route(NORM_FILLING_ROUTE, get(norm_filling_page))
        .route_layer(from_fn_with_state(
            norm_coherence,
            coherence_layer::<NormFilling>,
        ));

    Ok(nitrogen_routes
        .merge(norm_routes)
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state)
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context)))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found(request: Request<Body>) -> Response {
    HttpError::new(
        "infra::http::not_found",
        StatusCode::NOT_FOUND,
        "Resource not found",
        format!("no route for {}", request.uri().path()),
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        application::engines::tests_support::{fixture, repo},
        cache::{FlushPolicy, MemoryBackend},
    };

    fn router() -> Router {
        let stores = CacheStoreFactory::new(Arc::new(MemoryBackend::new()), FlushPolicy::Eager);
        build_router(HttpState::new(repo(fixture()), &stores, true).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn health_is_no_content() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let response = router()
            .oneshot(Request::get("/fields").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

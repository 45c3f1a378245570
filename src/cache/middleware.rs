//! Coherence middleware for calculation routes.
//!
//! Runs once per navigation, before the loader. When the `cacheHash` query
//! parameter differs from the hash the store records for the route's entity,
//! the navigation is answered with a single redirect to the corrected URL.
//! Replaying the corrected URL finds both sides equal and proceeds.

use std::{collections::BTreeMap, fmt, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderValue, Request, StatusCode, Uri,
        header::{CACHE_CONTROL, LOCATION},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;

use crate::{
    application::error::HttpError,
    domain::{ids::EntityId, kind::CalculationKind},
};

use super::{
    hasher::InputHash,
    store::{CacheStore, CachedResult},
};

/// Query parameter carrying the hash the displayed page claims is valid.
pub const CACHE_HASH_PARAM: &str = "cacheHash";

const SOURCE: &str = "cache::middleware::coherence_layer";
const NAVIGATION_ORIGIN: &str = "http://furrow.local";
pub(crate) const METRIC_COHERENCE_REDIRECT: &str = "furrow_coherence_redirect_total";

/// Misconfiguration of a calculation route. Always a programmer error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoherenceError {
    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidMatcher { pattern: String, reason: &'static str },
    #[error("id extractor found no usable `{param}` parameter in the navigation")]
    MissingEntityId { param: String },
    #[error("navigation url `{uri}` could not be parsed: {reason}")]
    InvalidUrl { uri: String, reason: String },
}

/// Path parameters captured by a [`RouteMatcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationParams(BTreeMap<String, String>);

impl NavigationParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Path predicate of a calculation route, e.g. `/fields/{field_id}/nitrogen-balance`.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    pattern: String,
    segments: Vec<Segment>,
}

impl RouteMatcher {
    pub fn new(pattern: &str) -> Result<Self, CoherenceError> {
        let invalid = |reason| CoherenceError::InvalidMatcher {
            pattern: pattern.to_string(),
            reason,
        };

        let Some(rest) = pattern.strip_prefix('/') else {
            return Err(invalid("pattern must start with `/`"));
        };
        if rest.is_empty() {
            return Err(invalid("pattern must name at least one segment"));
        }

        let mut segments = Vec::new();
        for raw in rest.split('/') {
            if raw.is_empty() {
                return Err(invalid("pattern contains an empty segment"));
            }
            match (raw.strip_prefix('{'), raw.ends_with('}')) {
                (Some(inner), true) => {
                    let name = &inner[..inner.len() - 1];
                    if name.is_empty() || name.contains(['{', '}']) {
                        return Err(invalid("parameter segment needs a plain name"));
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                (None, false) if !raw.contains(['{', '}']) => {
                    segments.push(Segment::Literal(raw.to_string()));
                }
                _ => return Err(invalid("unbalanced braces in segment")),
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Capture the pattern's parameters from `path`, `None` when it does not match.
    ///
    /// Captured values are percent-decoded, the same way axum's `Path`
    /// extractor decodes them for the handler. A capture that is not UTF-8
    /// once decoded does not match.
    pub fn match_path(&self, path: &str) -> Option<NavigationParams> {
        let rest = path.strip_prefix('/')?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = NavigationParams::default();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), urlencoding::decode(part).ok()?);
                }
            }
        }
        Some(params)
    }
}

type ExtractFn = dyn Fn(&NavigationParams) -> Result<EntityId, CoherenceError> + Send + Sync;

/// Derives the cache slot's entity id from navigation parameters.
#[derive(Clone)]
pub struct IdExtractor(Arc<ExtractFn>);

impl IdExtractor {
    pub fn new(
        extract: impl Fn(&NavigationParams) -> Result<EntityId, CoherenceError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(extract))
    }

    /// Use the named path parameter verbatim.
    pub fn param(name: &'static str) -> Self {
        Self::new(move |params| {
            params
                .get(name)
                .filter(|value| !value.trim().is_empty())
                .map(EntityId::from)
                .ok_or_else(|| CoherenceError::MissingEntityId {
                    param: name.to_string(),
                })
        })
    }

    pub fn extract(&self, params: &NavigationParams) -> Result<EntityId, CoherenceError> {
        (self.0)(params)
    }
}

impl fmt::Debug for IdExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdExtractor")
    }
}

type AccessFn<T> = dyn Fn(&HeaderMap) -> Option<Arc<CacheStore<T>>> + Send + Sync;

/// Resolves the persistent store for a navigation, or `None` when the
/// navigation runs without one (speculative prerender, caching disabled).
pub struct StoreAccessor<T>(Arc<AccessFn<T>>);

impl<T> Clone for StoreAccessor<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: CachedResult> StoreAccessor<T> {
    pub fn new(
        access: impl Fn(&HeaderMap) -> Option<Arc<CacheStore<T>>> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(access))
    }

    /// The store, except for prefetch and prerender passes.
    pub fn persistent(store: Arc<CacheStore<T>>) -> Self {
        Self::new(move |headers| (!is_speculative(headers)).then(|| Arc::clone(&store)))
    }

    /// Never a store: every navigation behaves like a first server pass.
    pub fn unavailable() -> Self {
        Self::new(|_| None)
    }

    pub fn resolve(&self, headers: &HeaderMap) -> Option<Arc<CacheStore<T>>> {
        (self.0)(headers)
    }
}

/// Speculative loads must not observe or correct the cache.
pub fn is_speculative(headers: &HeaderMap) -> bool {
    ["sec-purpose", "purpose"].iter().any(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| {
                let value = value.to_ascii_lowercase();
                value.contains("prefetch") || value.contains("prerender")
            })
    })
}

/// Outcome of one coherence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coherence {
    Proceed,
    Redirect { location: String },
}

/// Absolute navigation URL for a request URI.
pub fn navigation_url(uri: &Uri) -> Result<Url, CoherenceError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("{NAVIGATION_ORIGIN}{path_and_query}")).map_err(|err| {
        CoherenceError::InvalidUrl {
            uri: uri.to_string(),
            reason: err.to_string(),
        }
    })
}

/// Path plus query of `url`, suitable for a `Location` header.
pub fn location_of(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

/// Value of the `cacheHash` parameter, if present.
pub fn cache_hash_of(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == CACHE_HASH_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Copy of `url` with `cacheHash` set to `hash`, or removed when `None`.
///
/// Every other query pair keeps its position.
pub fn with_cache_hash(url: &Url, hash: Option<&InputHash>) -> Url {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != CACHE_HASH_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut corrected = url.clone();
    if retained.is_empty() && hash.is_none() {
        corrected.set_query(None);
        return corrected;
    }

    {
        let mut pairs = corrected.query_pairs_mut();
        pairs.clear();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        if let Some(hash) = hash {
            pairs.append_pair(CACHE_HASH_PARAM, hash.as_str());
        }
    }
    corrected
}

/// Compare the URL's claim with the store's record.
pub fn reconcile(url: &Url, stored: Option<&InputHash>) -> Coherence {
    let previous = cache_hash_of(url);
    let agrees = match (previous.as_deref(), stored) {
        (None, None) => true,
        (Some(previous), Some(stored)) => stored == previous,
        _ => false,
    };

    if agrees {
        Coherence::Proceed
    } else {
        Coherence::Redirect {
            location: location_of(&with_cache_hash(url, stored)),
        }
    }
}

/// Configuration of the coherence check for one calculation kind.
pub struct CoherenceLayer<T> {
    kind: CalculationKind,
    matcher: Arc<RouteMatcher>,
    store: StoreAccessor<T>,
    id: IdExtractor,
}

impl<T> Clone for CoherenceLayer<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            matcher: Arc::clone(&self.matcher),
            store: self.store.clone(),
            id: self.id.clone(),
        }
    }
}

impl<T: CachedResult> CoherenceLayer<T> {
    pub fn new(
        kind: CalculationKind,
        pattern: &str,
        store: StoreAccessor<T>,
        id: IdExtractor,
    ) -> Result<Self, CoherenceError> {
        Ok(Self {
            kind,
            matcher: Arc::new(RouteMatcher::new(pattern)?),
            store,
            id,
        })
    }

    /// Decide whether the navigation to `url` may proceed.
    pub fn evaluate(&self, url: &Url, headers: &HeaderMap) -> Result<Coherence, CoherenceError> {
        let Some(store) = self.store.resolve(headers) else {
            return Ok(Coherence::Proceed);
        };
        let Some(params) = self.matcher.match_path(url.path()) else {
            return Ok(Coherence::Proceed);
        };

        let entity = self.id.extract(&params)?;
        let stored = store.input_hash(&entity);
        let outcome = reconcile(url, stored.as_ref());

        debug!(
            target = "furrow::cache::middleware",
            kind = %self.kind,
            entity = %entity,
            stored = stored.as_ref().map(InputHash::short).unwrap_or("absent"),
            outcome = if outcome == Coherence::Proceed { "proceed" } else { "redirect" },
            "Coherence evaluated"
        );
        Ok(outcome)
    }
}

/// Axum middleware enforcing [`CoherenceLayer`] before the route handler runs.
#[instrument(skip_all, fields(kind = %layer.kind, path = %request.uri().path()))]
pub async fn coherence_layer<T: CachedResult>(
    State(layer): State<CoherenceLayer<T>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let evaluated = navigation_url(request.uri())
        .and_then(|url| layer.evaluate(&url, request.headers()));

    match evaluated {
        Ok(Coherence::Proceed) => next.run(request).await,
        Ok(Coherence::Redirect { location }) => {
            counter!(METRIC_COHERENCE_REDIRECT, "kind" => layer.kind.as_str()).increment(1);
            redirect_response(&location)
        }
        Err(err) => {
            error!(
                target = "furrow::cache::middleware",
                kind = %layer.kind,
                pattern = layer.matcher.pattern(),
                error = %err,
                "Calculation route is misconfigured"
            );
            HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Calculation route misconfigured",
                &err,
            )
            .into_response()
        }
    }
}

fn redirect_response(location: &str) -> Response {
    match HeaderValue::try_from(location) {
        Ok(value) => (
            StatusCode::TEMPORARY_REDIRECT,
            [(LOCATION, value), (CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        )
            .into_response(),
        Err(err) => HttpError::new(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Calculation route misconfigured",
            format!("corrected location `{location}` is not a header value: {err}"),
        )
        .into_response(),
    }
}

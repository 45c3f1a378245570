use std::time::Instant;

use axum::{
    body::Body,
    http::{Request, header::LOCATION},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

const TARGET: &str = "furrow::http::response";

/// Run the rest of the stack inside a span carrying a fresh request id, so
/// loader and coherence events share the request's context.
pub async fn set_request_context(request: Request<Body>, next: Next) -> Response {
    let span = info_span!(
        "http.request",
        request_id = %Uuid::new_v4(),
        method = %request.method(),
        path = %request.uri().path(),
    );
    next.run(request).instrument(span).await
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let query = request.uri().query().unwrap_or("").to_string();
    let start = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_redirection() {
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        debug!(
            target = TARGET,
            status = status.as_u16(),
            query = %query,
            location,
            "navigation redirected"
        );
        return response;
    }

    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let elapsed_ms = start.elapsed().as_millis();
    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = messages
        .first()
        .map(String::as_str)
        .unwrap_or("no diagnostic available");

    if status.is_server_error() {
        error!(
            target = TARGET,
            status = status.as_u16(),
            query = %query,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            "request failed"
        );
    } else {
        warn!(
            target = TARGET,
            status = status.as_u16(),
            query = %query,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            "client request error"
        );
    }

    response
}

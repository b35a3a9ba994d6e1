//! Per-request metrics and task-local request context.

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use pdfsqueeze_telemetry::{Metrics, RequestContext, with_request_context};

use crate::http::constants::HEADER_REQUEST_ID;

/// Route label for requests that matched no route.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Counts each request by matched route and status, and exposes its id and
/// route to everything the handler runs.
pub(crate) async fn track_request(
    State(metrics): State<Metrics>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
        .to_string();
    let request_id = request
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let context = RequestContext::new(request_id, route.as_str());
    let response = with_request_context(context, next.run(request)).await;
    metrics.inc_http_request(&route, response.status().as_u16());
    response
}

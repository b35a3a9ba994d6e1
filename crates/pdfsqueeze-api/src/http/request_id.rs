//! Drops caller-supplied request ids that are not UUIDs.
//!
//! Request ids double as run ids and staging file names, so only UUIDs are
//! accepted. Anything else is removed before the id generator runs, which then
//! assigns a fresh one.

use axum::{extract::Request, middleware::Next, response::Response};
use pdfsqueeze_telemetry::parse_request_id;
use tracing::debug;

use crate::http::constants::HEADER_REQUEST_ID;

pub(crate) async fn normalize_request_id(mut request: Request, next: Next) -> Response {
    let invalid = request
        .headers()
        .get(HEADER_REQUEST_ID)
        .is_some_and(|value| {
            value
                .to_str()
                .ok()
                .and_then(parse_request_id)
                .is_none()
        });
    if invalid {
        debug!("discarding non-UUID request id");
        request.headers_mut().remove(HEADER_REQUEST_ID);
    }
    next.run(request).await
}

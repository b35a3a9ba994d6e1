//! `x-request-id` handling for tower stacks.
//!
//! Request ids double as pipeline run ids and staging file names, so a client
//! value is only honoured when it parses as a UUID. Generated ids are UUID v4.

use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use uuid::Uuid;

/// Header carrying the request id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Parse a client-supplied request id; anything other than a UUID is refused.
#[must_use]
pub fn parse_request_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

/// Generates an id for requests that arrive without one.
#[must_use]
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Copies the request's id onto the response.
#[must_use]
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_uuids_are_accepted() {
        let id = Uuid::new_v4();
        assert_eq!(parse_request_id(&id.to_string()), Some(id));
        assert_eq!(parse_request_id(&format!(" {id} ")), Some(id));
        assert_eq!(parse_request_id("../../etc/passwd"), None);
        assert_eq!(parse_request_id(""), None);
    }
}

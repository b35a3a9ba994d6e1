//! Plain-text API errors.
//!
//! Bodies are short human-readable messages; the machine-readable kind travels
//! in the `x-pdfsqueeze-error` header.

use axum::{
    http::{HeaderName, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use pdfsqueeze_pipeline::PipelineError;

use crate::http::constants::HEADER_ERROR_KIND;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    message: String,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, message: String) -> Self {
        Self {
            status,
            kind,
            message,
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message.into())
    }

    pub(crate) fn message(&self) -> &str {
        &self.message
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        let status = StatusCode::from_u16(error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, error.kind(), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.message).into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        headers.insert(
            HeaderName::from_static(HEADER_ERROR_KIND),
            HeaderValue::from_static(self.kind),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pipeline_errors_keep_status_and_kind() {
        let too_large = ApiError::from(PipelineError::PayloadTooLarge { limit: 1 });
        assert_eq!(too_large.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(too_large.kind, "payload_too_large");

        let timeout = ApiError::from(PipelineError::Timeout {
            limit: Duration::from_secs(1),
        });
        assert_eq!(timeout.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(timeout.message(), "compression failed");
    }

    #[test]
    fn responses_are_plain_text_with_kind_header() {
        let response = ApiError::from(PipelineError::PayloadMissing).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static(TEXT_PLAIN))
        );
        assert_eq!(
            response.headers().get(HEADER_ERROR_KIND),
            Some(&HeaderValue::from_static("payload_missing"))
        );
    }
}

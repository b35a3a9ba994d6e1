//! `POST /compress-pdf`: multipart upload in, reduced document out.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{
        Query, State,
        multipart::{Field, Multipart, MultipartError, MultipartRejection},
    },
    http::{
        HeaderMap, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::Response,
};
use futures_util::StreamExt;
use pdfsqueeze_pipeline::{PayloadReadError, PipelineError, TransformRequest};
use pdfsqueeze_telemetry::parse_request_id;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::http::constants::{FILE_FIELD, HEADER_PRESET, HEADER_REQUEST_ID, MAX_FILE_NAME_LEN};
use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CompressQuery {
    #[serde(default)]
    pub(crate) quality: Option<String>,
}

pub(crate) async fn compress_pdf(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<CompressQuery>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let request_id = request_id(&headers);
    let expected_bytes = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let result = match multipart {
        Ok(mut multipart) => {
            let limit = state.request_timeout;
            let work = compress(&state, request_id, query.quality, expected_bytes, &mut multipart);
            match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        request_id = %request_id,
                        limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        "request timed out"
                    );
                    Err(PipelineError::Timeout { limit }.into())
                }
            }
        }
        Err(rejection) => Err(state
            .orchestrator
            .reject(
                request_id,
                PipelineError::BadRequest {
                    reason: "not_multipart",
                    detail: Some(rejection.body_text()),
                },
            )
            .into()),
    };

    if let Err(err) = &result {
        info!(
            request_id = %request_id,
            status = err.status.as_u16(),
            kind = err.kind,
            message = err.message(),
            "compression request failed"
        );
    }
    result
}

async fn compress(
    state: &ApiState,
    request_id: Uuid,
    quality: Option<String>,
    expected_bytes: Option<u64>,
    multipart: &mut Multipart,
) -> Result<Response, ApiError> {
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if is_file_field(&field) => break Some(field),
            Ok(Some(_)) => {}
            Ok(None) => break None,
            Err(err) => {
                return Err(state
                    .orchestrator
                    .reject(request_id, multipart_failure(&err, state.max_upload_bytes()))
                    .into());
            }
        }
    };

    let file_name = field
        .as_ref()
        .and_then(Field::file_name)
        .map(sanitize_file_name);
    let request = TransformRequest {
        request_id,
        quality,
        file_name,
        expected_bytes,
        payload: field.map(|field| field.map(read_chunk)),
    };
    let output = state.orchestrator.run(request).await?;

    let kind = output.kind();
    let preset = output.preset();
    let len = output.len();
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, kind.mime_type())
        .header(CONTENT_LENGTH, len)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", kind.download_name()),
        )
        .header(HEADER_PRESET, preset.as_str())
        .body(Body::from_stream(output.into_stream()))
        .map_err(|err| {
            error!(error = %err, "failed to build compression response");
            ApiError::internal("compression failed")
        })
}

fn request_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_request_id)
        .unwrap_or_else(Uuid::new_v4)
}

fn is_file_field(field: &Field<'_>) -> bool {
    field.file_name().is_some() || field.name() == Some(FILE_FIELD)
}

fn read_chunk(chunk: Result<Bytes, MultipartError>) -> Result<Bytes, PayloadReadError> {
    chunk.map_err(|err| read_failure(&err))
}

fn read_failure(err: &MultipartError) -> PayloadReadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PayloadReadError::LimitExceeded
    } else {
        PayloadReadError::Malformed {
            detail: err.body_text(),
        }
    }
}

fn multipart_failure(err: &MultipartError, limit: u64) -> PipelineError {
    match read_failure(err) {
        PayloadReadError::LimitExceeded => PipelineError::PayloadTooLarge { limit },
        PayloadReadError::Malformed { detail } => PipelineError::BadRequest {
            reason: "malformed_multipart",
            detail: Some(detail),
        },
    }
}

/// Keep the final path component, printable characters only, bounded length.
fn sanitize_file_name(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|ch| !ch.is_control())
        .take(MAX_FILE_NAME_LEN)
        .collect()
}

//! Health and diagnostics endpoints.

use std::sync::Arc;

use axum::{Json, body::Body, extract::State, http::StatusCode, response::Response};
use pdfsqueeze_pipeline::resolve_program;
use pdfsqueeze_telemetry::{MetricsSnapshot, build_sha};
use serde::Serialize;
use tracing::{error, warn};

use crate::http::errors::ApiError;
use crate::state::ApiState;

const COMPONENT_STAGING: &str = "staging";
const COMPONENT_ENGINE: &str = "engine";

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

#[derive(Serialize)]
pub(crate) struct EngineHealth {
    pub(crate) status: &'static str,
    pub(crate) program: String,
    pub(crate) available_slots: usize,
}

#[derive(Serialize)]
pub(crate) struct FullHealthResponse {
    pub(crate) status: &'static str,
    pub(crate) build: String,
    pub(crate) degraded: Vec<String>,
    pub(crate) staging: &'static str,
    pub(crate) engine: EngineHealth,
    pub(crate) metrics: MetricsSnapshot,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn health_full(State(state): State<Arc<ApiState>>) -> Json<FullHealthResponse> {
    let staging = match state.orchestrator.staging().probe_writable().await {
        Ok(()) => {
            state.remove_degraded_component(COMPONENT_STAGING);
            "ok"
        }
        Err(err) => {
            warn!(error = %err, "staging directory is not writable");
            state.add_degraded_component(COMPONENT_STAGING);
            "unavailable"
        }
    };

    let invoker = state.orchestrator.invoker();
    let program = invoker.program().display().to_string();
    let engine_status = if resolve_program(invoker.program()).is_some() {
        state.remove_degraded_component(COMPONENT_ENGINE);
        "ok"
    } else {
        warn!(program = %program, "compression engine binary not found");
        state.add_degraded_component(COMPONENT_ENGINE);
        "missing"
    };

    let degraded = state.current_health_degraded();
    let status = if degraded.is_empty() { "ok" } else { "degraded" };
    Json(FullHealthResponse {
        status,
        build: build_sha().to_string(),
        degraded,
        staging,
        engine: EngineHealth {
            status: engine_status,
            program,
            available_slots: invoker.available_permits(),
        },
        metrics: state.telemetry.snapshot(),
    })
}

pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    match state.telemetry.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )
            .body(Body::from(body))
            .map_err(|err| {
                error!(error = %err, "failed to build metrics response");
                ApiError::internal("failed to build metrics response")
            }),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            Err(ApiError::internal("failed to render metrics"))
        }
    }
}

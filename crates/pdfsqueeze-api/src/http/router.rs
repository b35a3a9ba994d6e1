//! Router construction and server host for the API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::Request,
    middleware,
    routing::{get, post},
};
use pdfsqueeze_pipeline::Orchestrator;
use pdfsqueeze_telemetry::build_sha;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info};

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::compress::compress_pdf;
use crate::http::constants::{HEADER_REQUEST_ID, MULTIPART_OVERHEAD_BYTES};
use crate::http::health::{health, health_full, metrics};
use crate::http::presets::list_presets;
use crate::http::progress::progress_events;
use crate::http::request_id::normalize_request_id;
use crate::http::telemetry::track_request;
use crate::state::ApiState;

/// Axum router wrapper that hosts the compression API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router around `orchestrator`.
    ///
    /// `request_timeout` bounds a whole compression request, upload included.
    #[must_use]
    pub fn new(orchestrator: Orchestrator, request_timeout: Duration) -> Self {
        let state = Arc::new(ApiState::new(orchestrator, request_timeout));
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        // Outermost first: ids are validated, then generated, then copied to
        // the response before tracing sees the request.
        let layered = ServiceBuilder::new()
            .layer(middleware::from_fn(normalize_request_id))
            .layer(pdfsqueeze_telemetry::set_request_id_layer())
            .layer(pdfsqueeze_telemetry::propagate_request_id_layer())
            .layer(trace_layer)
            .layer(middleware::from_fn_with_state(
                state.telemetry.clone(),
                track_request,
            ));

        let router = Self::build_router(&state)
            .layer(layered)
            .layer(CorsLayer::permissive())
            .with_state(state);
        Self { router }
    }

    fn build_router(state: &ApiState) -> Router<Arc<ApiState>> {
        let upload_limit = usize::try_from(
            state
                .max_upload_bytes()
                .saturating_add(MULTIPART_OVERHEAD_BYTES),
        )
        .unwrap_or(usize::MAX);

        Router::new()
            .route(
                "/compress-pdf",
                post(compress_pdf).layer(DefaultBodyLimit::max(upload_limit)),
            )
            .route("/v1/progress/{request_id}", get(progress_events))
            .route("/v1/presets", get(list_presets))
            .route("/health", get(health))
            .route("/health/full", get(health_full))
            .route("/metrics", get(metrics))
    }

    /// Borrow the fully layered router.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> ApiServerResult<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns [`ApiServerError::Serve`] if the server terminates unexpectedly.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "starting api");
        }
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|source| ApiServerError::Serve { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use axum::body::{Body, to_bytes};
    use axum::http::{StatusCode, header::CONTENT_TYPE};
    use axum::response::Response;
    use pdfsqueeze_config::StagingConfig;
    use pdfsqueeze_events::{Event, EventBus, ProgressPhase};
    use pdfsqueeze_pipeline::{EngineInvoker, StagingStore};
    use pdfsqueeze_telemetry::Metrics;
    use pdfsqueeze_test_support::{FakeEngine, FakeEngineBehavior, MultipartBody, sample_pdf};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BODY_LIMIT: usize = 16 * 1024 * 1024;

    struct Harness {
        dir: TempDir,
        events: EventBus,
        server: ApiServer,
    }

    impl Harness {
        async fn new(behavior: FakeEngineBehavior, max_upload_bytes: u64) -> Result<Self> {
            Self::with_timeouts(behavior, max_upload_bytes, Duration::from_secs(10)).await
        }

        async fn with_timeouts(
            behavior: FakeEngineBehavior,
            max_upload_bytes: u64,
            request_timeout: Duration,
        ) -> Result<Self> {
            Self::build(behavior, max_upload_bytes, request_timeout, EventBus::new()).await
        }

        async fn build(
            behavior: FakeEngineBehavior,
            max_upload_bytes: u64,
            request_timeout: Duration,
            events: EventBus,
        ) -> Result<Self> {
            let dir = TempDir::new()?;
            let engine = FakeEngine::install(dir.path().join("engine"), behavior)?;
            let metrics = Metrics::new()?;
            let mut staging = StagingConfig::new(dir.path().join("staging"));
            staging.max_upload_bytes = max_upload_bytes;
            let staging = StagingStore::open(staging, metrics.clone()).await?;
            let invoker =
                EngineInvoker::new(&engine.config(Duration::from_secs(30), 2), metrics.clone())
                    .with_terminate_grace(Duration::from_millis(100));
            let orchestrator =
                Orchestrator::new(staging, Arc::new(invoker), events.clone(), metrics)
                    .with_progress_tick(Duration::from_millis(20));
            Ok(Self {
                dir,
                events,
                server: ApiServer::new(orchestrator, request_timeout),
            })
        }

        fn staged_files(&self) -> Result<usize> {
            Ok(std::fs::read_dir(self.dir.path().join("staging"))?.count())
        }

        async fn send(&self, request: Request<Body>) -> Result<Response> {
            Ok(self.server.router().clone().oneshot(request).await?)
        }

        async fn get(&self, uri: &str) -> Result<Response> {
            self.send(Request::get(uri).body(Body::empty())?).await
        }

        async fn upload(
            &self,
            uri: &str,
            form: MultipartBody,
            request_id: Option<Uuid>,
        ) -> Result<Response> {
            let mut builder = Request::post(uri).header(CONTENT_TYPE, form.content_type());
            if let Some(id) = request_id {
                builder = builder.header(HEADER_REQUEST_ID, id.to_string());
            }
            self.send(builder.body(Body::from(form.finish()))?).await
        }
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|value| value.to_str().ok())
    }

    async fn body_text(response: Response) -> Result<String> {
        let bytes = to_bytes(response.into_body(), BODY_LIMIT).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    #[tokio::test]
    async fn compress_returns_a_smaller_pdf_attachment() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 8 * 1024 * 1024).await?;
        let input = sample_pdf(400_000);
        let form = MultipartBody::new().file("file", "report.pdf", "application/pdf", &input);

        let response = harness.upload("/compress-pdf?quality=screen", form, None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "content-type"), Some("application/pdf"));
        assert_eq!(header(&response, "x-pdfsqueeze-preset"), Some("screen"));
        assert_eq!(
            header(&response, "content-disposition"),
            Some("attachment; filename=\"compressed.pdf\"")
        );
        assert!(header(&response, HEADER_REQUEST_ID).is_some());

        let body = to_bytes(response.into_body(), BODY_LIMIT).await?;
        assert_eq!(body.len(), input.len() / 4);
        assert!(body.starts_with(b"%PDF-"));
        assert_eq!(harness.staged_files()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_field_is_a_bad_request() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let form = MultipartBody::new().text("quality", "screen");

        let response = harness.upload("/compress-pdf", form, None).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(header(&response, "x-pdfsqueeze-error"), Some("payload_missing"));
        Ok(())
    }

    #[tokio::test]
    async fn non_multipart_bodies_are_rejected() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let request = Request::post("/compress-pdf")
            .header(CONTENT_TYPE, "application/pdf")
            .body(Body::from(sample_pdf(1_000)))?;

        let response = harness.send(request).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(header(&response, "x-pdfsqueeze-error"), Some("bad_request"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_quality_falls_back_to_the_default_preset() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let form = MultipartBody::new().file("file", "a.pdf", "application/pdf", &sample_pdf(8_000));

        let response = harness.upload("/compress-pdf?quality=ultra", form, None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-pdfsqueeze-preset"), Some("ebook"));
        Ok(())
    }

    #[tokio::test]
    async fn oversized_uploads_get_413_and_leave_nothing_behind() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 64 * 1024).await?;
        let form = MultipartBody::new().file("file", "big.pdf", "application/pdf", &sample_pdf(512 * 1024));

        let response = harness.upload("/compress-pdf", form, None).await?;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(harness.staged_files()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn engine_failure_is_a_generic_500() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Fail, 1024 * 1024).await?;
        let form = MultipartBody::new().file("file", "a.pdf", "application/pdf", &sample_pdf(4_000));

        let response = harness.upload("/compress-pdf", form, None).await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&response, "x-pdfsqueeze-error"), Some("engine_failed"));
        let text = body_text(response).await?;
        assert_eq!(text, "compression failed");
        assert!(!text.contains("simulated"));
        assert_eq!(harness.staged_files()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn request_timeout_aborts_a_hung_run() -> Result<()> {
        let harness = Harness::with_timeouts(
            FakeEngineBehavior::Hang,
            1024 * 1024,
            Duration::from_millis(400),
        )
        .await?;
        let form = MultipartBody::new().file("file", "a.pdf", "application/pdf", &sample_pdf(4_000));

        let response = harness.upload("/compress-pdf", form, None).await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&response, "x-pdfsqueeze-error"), Some("timeout"));
        assert_eq!(harness.staged_files()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn client_request_ids_are_echoed_and_drive_progress() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let id = Uuid::new_v4();
        let form = MultipartBody::new().file("file", "a.pdf", "application/pdf", &sample_pdf(8_000));

        let response = harness.upload("/compress-pdf", form, Some(id)).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = id.to_string();
        assert_eq!(header(&response, HEADER_REQUEST_ID), Some(echoed.as_str()));
        to_bytes(response.into_body(), BODY_LIMIT).await?;

        let events = harness.get(&format!("/v1/progress/{id}")).await?;
        assert_eq!(events.status(), StatusCode::OK);
        assert_eq!(header(&events, "content-type"), Some("text/event-stream"));
        let stream = body_text(events).await?;
        assert!(stream.contains("event: progress"));
        assert!(stream.contains("\"percent\":100"));
        assert!(
            stream.trim_end().lines().any(|line| line == "event: run_completed"),
            "stream should end with the terminal event: {stream}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn late_subscribers_still_see_an_evicted_terminal_event() -> Result<()> {
        let harness = Harness::build(
            FakeEngineBehavior::Shrink,
            1024 * 1024,
            Duration::from_secs(10),
            EventBus::with_capacity(4),
        )
        .await?;
        let id = Uuid::new_v4();
        harness.events.publish(Event::RunFailed {
            request_id: id,
            kind: "timeout".into(),
            message: "compression failed".into(),
        });
        for _ in 0..8 {
            harness.events.publish(Event::Progress {
                request_id: Uuid::new_v4(),
                percent: 50,
                phase: ProgressPhase::Compressing,
            });
        }

        let response = harness.get(&format!("/v1/progress/{id}")).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let stream = tokio::time::timeout(Duration::from_secs(3), body_text(response))
            .await
            .context("stream for a finished run stayed open")??;
        assert!(stream.lines().any(|line| line == "event: run_failed"));
        Ok(())
    }

    #[tokio::test]
    async fn progress_for_an_unknown_run_closes() -> Result<()> {
        let harness = Harness::with_timeouts(
            FakeEngineBehavior::Shrink,
            1024 * 1024,
            Duration::from_millis(200),
        )
        .await?;

        let response = harness.get(&format!("/v1/progress/{}", Uuid::new_v4())).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let stream = tokio::time::timeout(Duration::from_secs(3), body_text(response))
            .await
            .context("stream for an unknown run stayed open")??;
        assert!(!stream.contains("event:"));
        Ok(())
    }

    #[tokio::test]
    async fn reused_live_request_id_is_a_conflict() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let id = Uuid::new_v4();
        let input = sample_pdf(8_000);
        let form = || MultipartBody::new().file("file", "a.pdf", "application/pdf", &input);

        let first = harness.upload("/compress-pdf", form(), Some(id)).await?;
        assert_eq!(first.status(), StatusCode::OK);

        let second = harness.upload("/compress-pdf", form(), Some(id)).await?;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(header(&second, "x-pdfsqueeze-error"), Some("request_id_in_use"));

        let body = to_bytes(first.into_body(), BODY_LIMIT).await?;
        assert_eq!(body.len(), input.len() / 2);
        assert_eq!(harness.staged_files()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_request_ids_are_replaced() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let request = Request::get("/health")
            .header(HEADER_REQUEST_ID, "../../etc/passwd")
            .body(Body::empty())?;

        let response = harness.send(request).await?;
        let id = header(&response, HEADER_REQUEST_ID).context("missing request id")?;
        assert!(Uuid::parse_str(id).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn progress_rejects_non_uuid_ids() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let response = harness.get("/v1/progress/not-a-uuid").await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn presets_list_every_quality() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let response = harness.get("/v1/presets").await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await?)?;
        assert_eq!(body["default"], "ebook");
        assert_eq!(body["policy"], "fallback");
        let names: Vec<_> = body["presets"]
            .as_array()
            .context("presets array")?
            .iter()
            .filter_map(|preset| preset["name"].as_str())
            .collect();
        assert_eq!(names, ["screen", "ebook", "printer"]);
        Ok(())
    }

    #[tokio::test]
    async fn health_endpoints_report_components() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        let basic = harness.get("/health").await?;
        assert_eq!(basic.status(), StatusCode::OK);
        assert_eq!(body_text(basic).await?, r#"{"status":"ok"}"#);

        let full = harness.get("/health/full").await?;
        assert_eq!(full.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(full).await?)?;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["staging"], "ok");
        assert_eq!(body["engine"]["status"], "ok");
        assert_eq!(body["engine"]["available_slots"], 2);
        Ok(())
    }

    #[tokio::test]
    async fn metrics_count_requests_by_route() -> Result<()> {
        let harness = Harness::new(FakeEngineBehavior::Shrink, 1024 * 1024).await?;
        harness.get("/health").await?;

        let response = harness.get("/metrics").await?;
        assert_eq!(
            header(&response, "content-type"),
            Some("text/plain; version=0.0.4")
        );
        let text = body_text(response).await?;
        assert!(text.contains("route=\"/health\""));
        Ok(())
    }
}

//! Sequences staging, invocation, and result hand-off for one request.
//!
//! # Design
//! - The preset is resolved before any byte is staged, so a rejected token never
//!   touches disk.
//! - The engine starts only after staging completes; the output is handed out
//!   only after the invoker reports success.
//! - Every error path drives the run to `Failed` and releases its staged paths
//!   before the error is returned.
//! - A request id whose paths are held by a live run is refused before a run
//!   exists, so the holder sees no foreign events and keeps its files.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use pdfsqueeze_config::ServiceConfig;
use pdfsqueeze_events::EventBus;
use pdfsqueeze_telemetry::{Metrics, RunOutcomeLabel, current_request};
use tokio::io::AsyncReadExt;
use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

use crate::document::DocumentKind;
use crate::error::{PayloadReadError, PipelineError, PipelineResult, StagingError};
use crate::invoker::Invoker;
use crate::preset::{Preset, PresetResolver};
use crate::progress::ProgressReporter;
use crate::run::{PipelineRun, RunSummary};
use crate::staging::StagingStore;

const OUTPUT_CHUNK_BYTES: usize = 64 * 1024;
const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_PROGRESS_TICK: Duration = Duration::from_millis(500);

/// Inputs for one pipeline run.
pub struct TransformRequest<S> {
    /// Run identifier.
    pub request_id: Uuid,
    /// Caller-supplied quality token.
    pub quality: Option<String>,
    /// Client-supplied file name; only used for logs and type fallback.
    pub file_name: Option<String>,
    /// Expected body size, used as the upload progress denominator.
    pub expected_bytes: Option<u64>,
    /// File payload, if the request carried one.
    pub payload: Option<S>,
}

impl<S> TransformRequest<S> {
    /// Request with a payload and no other hints.
    #[must_use]
    pub fn new(request_id: Uuid, payload: S) -> Self {
        Self {
            request_id,
            quality: None,
            file_name: None,
            expected_bytes: None,
            payload: Some(payload),
        }
    }

    /// Set the quality token.
    #[must_use]
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    /// Set the client file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Pipeline entry point shared by all requests.
#[derive(Clone)]
pub struct Orchestrator {
    staging: StagingStore,
    resolver: PresetResolver,
    invoker: Arc<dyn Invoker>,
    events: EventBus,
    metrics: Metrics,
    engine_timeout: Duration,
    progress_tick: Duration,
}

impl Orchestrator {
    /// Orchestrator with the default policy, engine timeout, and progress tick.
    #[must_use]
    pub fn new(
        staging: StagingStore,
        invoker: Arc<dyn Invoker>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            staging,
            resolver: PresetResolver::default(),
            invoker,
            events,
            metrics,
            engine_timeout: DEFAULT_ENGINE_TIMEOUT,
            progress_tick: DEFAULT_PROGRESS_TICK,
        }
    }

    /// Apply the policy, timeout, and tick from the service configuration.
    #[must_use]
    pub fn configured(mut self, config: &ServiceConfig) -> Self {
        self.resolver = PresetResolver::new(config.preset_policy);
        self.engine_timeout = config.engine.timeout;
        self.progress_tick = config.progress_tick;
        self
    }

    /// Override the preset resolver.
    #[must_use]
    pub const fn with_resolver(mut self, resolver: PresetResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Override the engine timeout.
    #[must_use]
    pub const fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    /// Override the progress tick.
    #[must_use]
    pub const fn with_progress_tick(mut self, tick: Duration) -> Self {
        self.progress_tick = tick;
        self
    }

    /// Staging store backing the runs.
    #[must_use]
    pub const fn staging(&self) -> &StagingStore {
        &self.staging
    }

    /// Engine invoker.
    #[must_use]
    pub fn invoker(&self) -> &dyn Invoker {
        self.invoker.as_ref()
    }

    /// Event bus runs publish on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Shared metrics.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Active preset resolver.
    #[must_use]
    pub const fn resolver(&self) -> &PresetResolver {
        &self.resolver
    }

    /// Drive one request to a terminal state.
    ///
    /// Dropping the returned future before it resolves cancels the run and
    /// releases its staged paths.
    ///
    /// # Errors
    ///
    /// Returns the [`PipelineError`] that ended the run. Staged paths are
    /// already released when it is returned.
    pub async fn run<S, B>(&self, request: TransformRequest<S>) -> PipelineResult<CompressedOutput>
    where
        S: Stream<Item = Result<B, PayloadReadError>>,
        B: AsRef<[u8]>,
    {
        let route = current_request().map_or_else(String::new, |context| context.route().to_string());
        let span = info_span!("pipeline_run", request_id = %request.request_id, route = %route);
        self.execute(request).instrument(span).await
    }

    /// Record a request that failed before a run could start.
    ///
    /// The failure is published for the request id so progress subscribers
    /// still see a terminal event.
    #[must_use]
    pub fn reject(&self, request_id: Uuid, error: PipelineError) -> PipelineError {
        let run = PipelineRun::new(request_id, self.events.clone(), self.metrics.clone());
        fail(run, error)
    }

    async fn execute<S, B>(&self, request: TransformRequest<S>) -> PipelineResult<CompressedOutput>
    where
        S: Stream<Item = Result<B, PayloadReadError>>,
        B: AsRef<[u8]>,
    {
        let TransformRequest {
            request_id,
            quality,
            file_name,
            expected_bytes,
            payload,
        } = request;
        if self.staging.is_in_use(request_id).await {
            self.metrics.inc_pipeline_run(RunOutcomeLabel::Rejected);
            warn!(request_id = %request_id, outcome = "request_id_in_use", "request id held by a live run");
            return Err(PipelineError::RequestIdInUse);
        }
        let mut run = PipelineRun::new(request_id, self.events.clone(), self.metrics.clone());
        let progress = ProgressReporter::new(request_id, self.events.clone(), self.metrics.clone());

        let profile = match self.resolver.resolve(quality.as_deref()) {
            Ok(profile) => profile,
            Err(err) => return Err(fail(run, err)),
        };
        let Some(payload) = payload else {
            return Err(fail(run, PipelineError::PayloadMissing));
        };

        let mut staged_run = self.staging.begin(request_id);
        let input = staged_run.input_path().to_path_buf();
        let output = staged_run.output_path().to_path_buf();
        let staged = self
            .staging
            .stage(&mut staged_run, payload, |received| {
                progress.upload(received, expected_bytes);
            })
            .await;
        run.attach(staged_run);
        let staged = match staged {
            Ok(staged) if staged.size_bytes == 0 => {
                self.metrics.inc_upload_rejection("empty");
                return Err(fail(run, PipelineError::PayloadMissing));
            }
            Ok(staged) => staged,
            Err(err) => {
                if matches!(err, StagingError::PayloadTooLarge { .. }) {
                    self.metrics.inc_upload_rejection("too_large");
                }
                return Err(fail(run, err.into()));
            }
        };
        if let Err(err) = run.mark_staged() {
            return Err(fail(run, err.into()));
        }
        progress.staged();

        let kind = DocumentKind::detect(&staged.head, file_name.as_deref());
        if let Err(err) = run.mark_invoking() {
            return Err(fail(run, err.into()));
        }

        let ticker = progress.start_engine(self.progress_tick);
        let invoked = self
            .invoker
            .invoke(&input, &output, &profile, self.engine_timeout)
            .await;
        ticker.stop().await;
        let report = match invoked {
            Ok(report) => report,
            Err(err) => return Err(fail(run, err.into())),
        };

        let summary = RunSummary {
            preset: profile.preset,
            input_bytes: staged.size_bytes,
            output_bytes: report.output_bytes,
        };
        if let Err(err) = run.succeed(summary, &progress) {
            return Err(fail(run, err.into()));
        }

        Ok(CompressedOutput {
            run,
            path: output,
            kind,
            preset: profile.preset,
            len: report.output_bytes,
        })
    }
}

fn fail(mut run: PipelineRun, error: PipelineError) -> PipelineError {
    if let Err(err) = run.fail(&error) {
        warn!(request_id = %run.request_id(), error = %err, "run already terminal when failing");
        run.release();
    }
    error
}

/// Output of a successful run.
///
/// The staged paths are released once this value, or the stream created from
/// it, is dropped.
pub struct CompressedOutput {
    run: PipelineRun,
    path: PathBuf,
    kind: DocumentKind,
    preset: Preset,
    len: u64,
}

impl CompressedOutput {
    /// Detected document family.
    #[must_use]
    pub const fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// Preset the engine ran with.
    #[must_use]
    pub const fn preset(&self) -> Preset {
        self.preset
    }

    /// Output size in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the output is empty. Always `false` for a successful run.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the whole output and release the staged paths.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the output cannot be read.
    pub async fn read_all(mut self) -> io::Result<Vec<u8>> {
        let bytes = tokio::fs::read(&self.path).await?;
        self.run.release();
        Ok(bytes)
    }

    /// Stream the output in fixed-size chunks, releasing the staged paths
    /// after the last chunk or when the stream is dropped.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
        async_stream::try_stream! {
            let mut output = self;
            let mut file = tokio::fs::File::open(&output.path).await?;
            let mut buf = vec![0_u8; OUTPUT_CHUNK_BYTES];
            loop {
                let read = file.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                yield buf[..read].to_vec();
            }
            drop(file);
            output.run.release();
        }
    }
}

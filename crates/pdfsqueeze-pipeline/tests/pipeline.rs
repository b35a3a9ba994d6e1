//! End-to-end pipeline runs against scripted engines.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::{StreamExt, stream};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use pdfsqueeze_config::StagingConfig;
use pdfsqueeze_events::{Event, EventBus};
use pdfsqueeze_pipeline::{
    DocumentKind, EngineInvoker, Orchestrator, PayloadReadError, PipelineError, Preset,
    StagingStore, TransformRequest,
};
use pdfsqueeze_telemetry::Metrics;
use pdfsqueeze_test_support::{FakeEngine, FakeEngineBehavior, sample_pdf};
use tempfile::TempDir;
use uuid::Uuid;

struct Pipeline {
    dir: TempDir,
    engine: FakeEngine,
    orchestrator: Orchestrator,
    metrics: Metrics,
}

impl Pipeline {
    async fn new(behavior: FakeEngineBehavior, engine_timeout: Duration) -> Result<Self> {
        let dir = TempDir::new()?;
        let engine = FakeEngine::install(dir.path().join("engine"), behavior)?;
        let metrics = Metrics::new()?;
        let staging = StagingStore::open(
            StagingConfig::new(dir.path().join("staging")),
            metrics.clone(),
        )
        .await?;
        let invoker = EngineInvoker::new(&engine.config(engine_timeout, 4), metrics.clone())
            .with_terminate_grace(Duration::from_millis(200));
        let orchestrator =
            Orchestrator::new(staging, Arc::new(invoker), EventBus::new(), metrics.clone())
                .with_engine_timeout(engine_timeout)
                .with_progress_tick(Duration::from_millis(20));
        Ok(Self {
            dir,
            engine,
            orchestrator,
            metrics,
        })
    }

    fn staged_files(&self) -> Result<usize> {
        Ok(std::fs::read_dir(self.dir.path().join("staging"))?.count())
    }

    async fn compress(&self, data: Vec<u8>, quality: &str) -> Result<Vec<u8>> {
        let output = self
            .orchestrator
            .run(request(Uuid::new_v4(), data, quality))
            .await?;
        let mut body = Vec::new();
        let mut chunks = Box::pin(output.into_stream());
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }
}

/// Whether `pid` is alive and not a zombie.
fn is_running(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Err(Errno::ESRCH) => false,
        _ => std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| {
                stat.rsplit_once(')')
                    .and_then(|(_, rest)| rest.trim_start().chars().next())
                    .is_some_and(|state| state != 'Z' && state != 'X')
            })
            .unwrap_or(false),
    }
}

fn request(
    request_id: Uuid,
    data: Vec<u8>,
    quality: &str,
) -> TransformRequest<impl futures_core::Stream<Item = Result<Vec<u8>, PayloadReadError>> + use<>> {
    let chunks: Vec<Result<Vec<u8>, PayloadReadError>> =
        data.chunks(16 * 1024).map(|chunk| Ok(chunk.to_vec())).collect();
    TransformRequest::new(request_id, stream::iter(chunks))
        .with_quality(quality)
        .with_file_name("upload.pdf")
}

#[tokio::test]
async fn screen_preset_shrinks_a_two_megabyte_pdf() -> Result<()> {
    let pipeline = Pipeline::new(FakeEngineBehavior::Shrink, Duration::from_secs(10)).await?;
    let input = sample_pdf(2 * 1024 * 1024);
    let id = Uuid::new_v4();

    let output = pipeline
        .orchestrator
        .run(request(id, input.clone(), "screen"))
        .await?;
    assert_eq!(output.kind(), DocumentKind::Pdf);
    assert_eq!(output.kind().mime_type(), "application/pdf");
    let body = output.read_all().await?;

    assert!(!body.is_empty());
    assert!(body.len() < input.len());
    assert_eq!(pipeline.staged_files()?, 0);
    assert_eq!(pipeline.metrics.snapshot().runs_succeeded_total, 1);
    Ok(())
}

#[tokio::test]
async fn each_preset_reaches_the_engine_with_distinct_arguments() -> Result<()> {
    let pipeline = Pipeline::new(FakeEngineBehavior::Shrink, Duration::from_secs(10)).await?;
    let input = sample_pdf(8_000);

    let mut sizes = Vec::new();
    for preset in Preset::ALL {
        sizes.push(
            pipeline
                .compress(input.clone(), preset.as_str())
                .await
                .with_context(|| format!("{preset} run failed"))?
                .len(),
        );
    }

    assert_eq!(sizes, vec![2_000, 4_000, 8_000]);
    assert_eq!(
        pipeline.engine.invocations(),
        vec![
            "-dPDFSETTINGS=/screen",
            "-dPDFSETTINGS=/ebook",
            "-dPDFSETTINGS=/printer"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failing_engine_returns_generic_error_and_cleans_up() -> Result<()> {
    let pipeline = Pipeline::new(FakeEngineBehavior::Fail, Duration::from_secs(10)).await?;
    let err = pipeline
        .compress(sample_pdf(1_000), "ebook")
        .await
        .err()
        .context("failing engine should not succeed")?;
    let err = err
        .downcast_ref::<PipelineError>()
        .context("expected a pipeline error")?;

    assert_eq!(err.status_code(), 500);
    assert_eq!(err.kind(), "engine_failed");
    assert_eq!(err.to_string(), "compression failed");
    assert_eq!(pipeline.staged_files()?, 0);
    Ok(())
}

#[tokio::test]
async fn hung_engine_is_killed_at_the_timeout() -> Result<()> {
    let pipeline = Pipeline::new(FakeEngineBehavior::Hang, Duration::from_millis(500)).await?;
    let id = Uuid::new_v4();
    let started = Instant::now();

    let err = pipeline
        .orchestrator
        .run(request(id, sample_pdf(1_000), "printer"))
        .await
        .err()
        .context("hung engine should time out")?;

    assert!(matches!(err, PipelineError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    let pid = pipeline
        .engine
        .recorded_pid()
        .context("engine never recorded its pid")?;
    assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
    assert_eq!(pipeline.staged_files()?, 0);
    assert_eq!(pipeline.metrics.snapshot().engine_invocations_active, 0);

    let history = pipeline.orchestrator.events().history(id);
    let heartbeats = history
        .iter()
        .filter(|envelope| matches!(envelope.event, Event::Progress { .. }))
        .count();
    assert!(heartbeats > 2, "progress stalled while the engine ran");
    assert!(matches!(
        history.last().map(|envelope| &envelope.event),
        Some(Event::RunFailed { kind, .. }) if kind == "timeout"
    ));
    Ok(())
}

#[tokio::test]
async fn concurrent_runs_get_their_own_outputs() -> Result<()> {
    let pipeline = Arc::new(Pipeline::new(FakeEngineBehavior::Shrink, Duration::from_secs(20)).await?);

    let mut tasks = Vec::new();
    for index in 0..12_usize {
        let pipeline = Arc::clone(&pipeline);
        tasks.push(tokio::spawn(async move {
            let size = 4_000 + index * 400;
            let body = pipeline
                .compress(sample_pdf(size), "ebook")
                .await
                .with_context(|| format!("run {index} failed"))?;
            Ok::<_, anyhow::Error>((size, body))
        }));
    }

    for task in tasks {
        let (size, body) = task.await??;
        assert_eq!(body.len(), size / 2);
        assert_eq!(body, sample_pdf(size)[..size / 2]);
    }
    assert_eq!(pipeline.staged_files()?, 0);
    assert_eq!(pipeline.metrics.snapshot().runs_succeeded_total, 12);
    Ok(())
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn cancelled_run_releases_staging_and_kills_the_engine() -> Result<()> {
    let pipeline = Pipeline::new(FakeEngineBehavior::Hang, Duration::from_secs(30)).await?;
    let id = Uuid::new_v4();

    let run = pipeline
        .orchestrator
        .run(request(id, sample_pdf(1_000), "ebook"));
    let outcome = tokio::time::timeout(Duration::from_millis(500), run).await;
    assert!(outcome.is_err(), "hung engine should still be running");

    let pid = pipeline
        .engine
        .recorded_pid()
        .context("engine never recorded its pid")?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while is_running(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!is_running(pid), "engine outlived its cancelled run");
    assert_eq!(pipeline.staged_files()?, 0);
    assert!(matches!(
        pipeline.orchestrator.events().history(id).last().map(|envelope| &envelope.event),
        Some(Event::RunFailed { kind, .. }) if kind == "cancelled"
    ));
    Ok(())
}

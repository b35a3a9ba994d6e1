use std::future::Future;
use std::sync::Arc;

use pdfsqueeze_api::ApiServer;
use pdfsqueeze_config::{LogStyle, ServiceConfig};
use pdfsqueeze_events::EventBus;
use pdfsqueeze_pipeline::{EngineInvoker, Orchestrator, StagingStore, resolve_program};
use pdfsqueeze_telemetry::{LogFormat, LoggingConfig, Metrics, app_span};
use tracing::{Instrument, info, warn};

use crate::error::{AppError, AppResult};

/// Dependencies required to bootstrap the service.
pub(crate) struct BootstrapDependencies {
    config: ServiceConfig,
    events: EventBus,
    telemetry: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) fn from_env() -> AppResult<Self> {
        let config =
            ServiceConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
        Self::with_config(config)
    }

    pub(crate) fn with_config(config: ServiceConfig) -> AppResult<Self> {
        let telemetry =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            config,
            events: EventBus::new(),
            telemetry,
        })
    }
}

/// Entry point for the service boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, staging setup, or the listener fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    let logging = &dependencies.config.logging;
    pdfsqueeze_telemetry::init_logging(&LoggingConfig {
        level: &logging.level,
        format: match logging.format {
            Some(LogStyle::Json) => LogFormat::Json,
            Some(LogStyle::Pretty) => LogFormat::Pretty,
            None => LogFormat::infer(),
        },
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    run_app_with(dependencies, shutdown_signal())
        .instrument(app_span("pdfsqueeze"))
        .await
}

/// Boot sequence over injected dependencies; serves until `shutdown` resolves.
pub(crate) async fn run_app_with<F>(
    dependencies: BootstrapDependencies,
    shutdown: F,
) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let BootstrapDependencies {
        config,
        events,
        telemetry,
    } = dependencies;
    info!(
        bind_addr = %config.bind_addr,
        staging_dir = %config.staging.base_dir.display(),
        engine = %config.engine.program.display(),
        "pdfsqueeze bootstrap starting"
    );

    let staging = StagingStore::open(config.staging.clone(), telemetry.clone())
        .await
        .map_err(|err| AppError::staging("staging.open", err))?;
    if let Some(older_than) = staging.purge_stale_after() {
        match staging.purge_stale(older_than) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "purged stale staging files"),
            Err(err) => warn!(error = %err, "stale staging purge failed"),
        }
    }

    if resolve_program(&config.engine.program).is_none() {
        warn!(
            program = %config.engine.program.display(),
            "compression engine not found; requests will fail until it is installed"
        );
    }
    let invoker = EngineInvoker::new(&config.engine, telemetry.clone());
    let orchestrator = Orchestrator::new(staging, Arc::new(invoker), events, telemetry)
        .configured(&config);
    let api = ApiServer::new(orchestrator, config.request_timeout);

    let listener = ApiServer::bind(config.bind_addr)
        .await
        .map_err(|err| AppError::api_server("api.bind", err))?;
    info!(addr = %config.bind_addr, "launching api listener");
    api.serve(listener, shutdown)
        .await
        .map_err(|err| AppError::api_server("api.serve", err))?;
    info!("pdfsqueeze stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on unix, `SIGTERM`.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("ctrl-c received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}

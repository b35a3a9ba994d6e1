//! Shared handler state and degraded-component tracking.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pdfsqueeze_events::EventBus;
use pdfsqueeze_pipeline::Orchestrator;
use pdfsqueeze_telemetry::Metrics;
use tracing::{info, warn};

pub(crate) struct ApiState {
    pub(crate) orchestrator: Orchestrator,
    pub(crate) telemetry: Metrics,
    pub(crate) events: EventBus,
    pub(crate) request_timeout: Duration,
    health_status: Mutex<Vec<String>>,
}

impl ApiState {
    pub(crate) fn new(orchestrator: Orchestrator, request_timeout: Duration) -> Self {
        Self {
            telemetry: orchestrator.metrics().clone(),
            events: orchestrator.events().clone(),
            orchestrator,
            request_timeout,
            health_status: Mutex::new(Vec::new()),
        }
    }

    /// Upload ceiling enforced by the staging store.
    pub(crate) const fn max_upload_bytes(&self) -> u64 {
        self.orchestrator.staging().max_upload_bytes()
    }

    pub(crate) fn add_degraded_component(&self, component: &str) -> bool {
        let mut guard = self.lock_health();
        if guard.iter().any(|entry| entry == component) {
            return false;
        }
        guard.push(component.to_string());
        guard.sort();
        drop(guard);
        warn!(component, "component degraded");
        true
    }

    pub(crate) fn remove_degraded_component(&self, component: &str) -> bool {
        let mut guard = self.lock_health();
        let previous = guard.len();
        guard.retain(|entry| entry != component);
        let removed = guard.len() != previous;
        drop(guard);
        if removed {
            info!(component, "component recovered");
        }
        removed
    }

    pub(crate) fn current_health_degraded(&self) -> Vec<String> {
        self.lock_health().clone()
    }

    fn lock_health(&self) -> MutexGuard<'_, Vec<String>> {
        self.health_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

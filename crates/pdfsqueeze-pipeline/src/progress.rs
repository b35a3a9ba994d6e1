//! Progress percentages published on the event bus.
//!
//! Upload bytes map onto `0..=50`. While the engine runs a ticker creeps toward
//! [`ENGINE_CEILING`] and re-publishes on every tick, so observers see a
//! heartbeat even when the value has stopped moving. Only [`ProgressReporter::complete`]
//! reaches 100. The value never goes backwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use pdfsqueeze_events::{Event, EventBus, ProgressPhase};
use pdfsqueeze_telemetry::Metrics;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::run::emit;

/// Percentage reached once the upload is fully staged.
pub const UPLOAD_CEILING: u8 = 50;
/// Highest percentage the engine heuristic can report.
pub const ENGINE_CEILING: u8 = 94;
/// Percentage reported on success.
pub const COMPLETE: u8 = 100;

/// Publishes monotonic progress for one run.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    request_id: Uuid,
    percent: AtomicU8,
    events: EventBus,
    metrics: Metrics,
}

impl ProgressReporter {
    /// Reporter starting at 0%.
    #[must_use]
    pub fn new(request_id: Uuid, events: EventBus, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                request_id,
                percent: AtomicU8::new(0),
                events,
                metrics,
            }),
        }
    }

    /// Last reported percentage.
    #[must_use]
    pub fn percent(&self) -> u8 {
        self.inner.percent.load(Ordering::Acquire)
    }

    /// Record upload progress. Without an expected size nothing is published
    /// until [`Self::staged`].
    pub fn upload(&self, received: u64, expected: Option<u64>) {
        let Some(expected) = expected.filter(|expected| *expected > 0) else {
            return;
        };
        let scaled = received.saturating_mul(u64::from(UPLOAD_CEILING)) / expected;
        let percent = u8::try_from(scaled.min(u64::from(UPLOAD_CEILING))).unwrap_or(UPLOAD_CEILING);
        self.advance(percent, ProgressPhase::Uploading, false);
    }

    /// Record that staging finished.
    pub fn staged(&self) {
        self.advance(UPLOAD_CEILING, ProgressPhase::Uploading, false);
    }

    /// Start the engine heuristic, ticking every `tick`.
    #[must_use]
    pub fn start_engine(&self, tick: Duration) -> EngineTicker {
        let reporter = self.clone();
        let tick = tick.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            loop {
                interval.tick().await;
                let next = engine_step(reporter.percent());
                reporter.advance(next, ProgressPhase::Compressing, true);
            }
        });
        EngineTicker {
            handle: Some(handle),
        }
    }

    /// Report 100%.
    pub fn complete(&self) {
        self.advance(COMPLETE, ProgressPhase::Done, false);
    }

    fn advance(&self, target: u8, phase: ProgressPhase, heartbeat: bool) {
        let previous = self.inner.percent.fetch_max(target, Ordering::AcqRel);
        let current = previous.max(target);
        if current > previous || heartbeat {
            emit(
                &self.inner.events,
                &self.inner.metrics,
                Event::Progress {
                    request_id: self.inner.request_id,
                    percent: current,
                    phase,
                },
            );
        }
    }
}

/// Next heuristic value: an eighth of the remaining gap, at least one point.
fn engine_step(current: u8) -> u8 {
    if current < UPLOAD_CEILING {
        return UPLOAD_CEILING;
    }
    let remaining = ENGINE_CEILING.saturating_sub(current);
    current + (remaining / 8).max(u8::from(remaining > 0))
}

/// Handle to the running engine heuristic.
///
/// Dropping the handle aborts the ticker.
pub struct EngineTicker {
    handle: Option<JoinHandle<()>>,
}

impl EngineTicker {
    /// Stop the ticker and wait until it can no longer publish.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for EngineTicker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn percents(events: &EventBus, request_id: Uuid) -> Vec<u8> {
        events
            .history(request_id)
            .into_iter()
            .filter_map(|envelope| match envelope.event {
                Event::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn engine_heuristic_approaches_but_never_reaches_ninety_five() {
        let mut percent = 0;
        for _ in 0..200 {
            let next = engine_step(percent);
            assert!(next >= percent);
            percent = next;
        }
        assert_eq!(percent, ENGINE_CEILING);
        assert_eq!(engine_step(10), UPLOAD_CEILING);
    }

    #[test]
    fn upload_maps_to_first_half_and_never_regresses() -> TestResult {
        let events = EventBus::new();
        let id = Uuid::new_v4();
        let reporter = ProgressReporter::new(id, events.clone(), Metrics::new()?);

        reporter.upload(25, Some(100));
        reporter.upload(10, Some(100));
        reporter.upload(500, Some(100));
        reporter.upload(90, None);
        reporter.staged();

        assert_eq!(percents(&events, id), vec![12, 50]);
        assert_eq!(reporter.percent(), UPLOAD_CEILING);
        Ok(())
    }

    #[tokio::test]
    async fn ticker_publishes_heartbeats_until_stopped() -> TestResult {
        let events = EventBus::new();
        let id = Uuid::new_v4();
        let reporter = ProgressReporter::new(id, events.clone(), Metrics::new()?);
        reporter.staged();

        let ticker = reporter.start_engine(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_secs(1)).await;
        ticker.stop().await;
        let during = percents(&events, id);
        reporter.complete();

        assert!(during.len() > 30);
        assert!(during.iter().all(|percent| *percent <= ENGINE_CEILING));
        assert!(during.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(during.last(), Some(&ENGINE_CEILING));
        assert_eq!(percents(&events, id).last(), Some(&COMPLETE));
        Ok(())
    }
}

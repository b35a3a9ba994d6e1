//! `GET /v1/progress/{request_id}`: one run's events as server-sent events.
//!
//! Late subscribers get the run's buffered events first. The stream ends after
//! the run's terminal event. When the stream goes quiet the bus is asked about
//! the run: a finished run gets its retained terminal event, an unknown one
//! gets the stream closed.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::{Path, State},
    response::sse::{self, Sse},
};
use pdfsqueeze_events::{EventBus, RunStatus};
use tracing::{debug, error};
use uuid::Uuid;

use crate::http::constants::{SSE_KEEP_ALIVE_SECS, UNKNOWN_RUN_WAIT_SECS};
use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn progress_events(
    State(state): State<Arc<ApiState>>,
    Path(raw_id): Path<String>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send>, ApiError>
{
    let request_id = Uuid::parse_str(&raw_id)
        .map_err(|_| ApiError::bad_request("request id must be a UUID"))?;
    let idle = state
        .request_timeout
        .min(Duration::from_secs(UNKNOWN_RUN_WAIT_SECS));
    Ok(Sse::new(run_event_stream(state.events.clone(), request_id, idle)).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

/// Events for `request_id` until its terminal event.
///
/// After `idle` without an event the run's status decides: live runs keep the
/// stream open, unknown runs close it.
pub(crate) fn run_event_stream(
    bus: EventBus,
    request_id: Uuid,
    idle: Duration,
) -> impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send {
    stream! {
        let mut events = bus.subscribe_run(request_id);
        loop {
            let envelope = match tokio::time::timeout(idle, events.next()).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(_) => match bus.run_status(request_id) {
                    RunStatus::Active => continue,
                    RunStatus::Finished(terminal) => terminal,
                    RunStatus::Unknown => {
                        debug!(request_id = %request_id, "closing progress stream for unknown run");
                        break;
                    }
                },
            };
            let terminal = envelope.event.is_terminal();
            match serde_json::to_string(&envelope) {
                Ok(payload) => {
                    yield Ok(sse::Event::default()
                        .id(envelope.id.to_string())
                        .event(envelope.event.kind())
                        .data(payload));
                }
                Err(err) => error!(error = %err, "failed to serialise progress event"),
            }
            if terminal {
                break;
            }
        }
    }
}

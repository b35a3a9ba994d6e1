#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Event bus for compression run lifecycle and progress.
//!
//! The bus provides a typed event enum, sequential identifiers, and support for
//! replaying recent events when subscribers connect late (e.g. an SSE client
//! that opens the progress stream after the upload started). Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows, the
//! oldest events are dropped.
//!
//! Alongside the replay ring the bus tracks which runs are live and keeps the
//! terminal event of recently finished runs, so [`EventBus::run_status`] can
//! answer after a run's events have been evicted.

pub mod payloads;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast::{self, Receiver, Sender};
use uuid::Uuid;

pub use payloads::{
    DEFAULT_FINISHED_CAPACITY, DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId,
    ProgressPhase, RunPhase,
};

/// What the bus knows about a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// No event has been seen for the run, or it finished too long ago.
    Unknown,
    /// The run has published events but no terminal event yet.
    Active,
    /// The run ended with this terminal event.
    Finished(EventEnvelope),
}

#[derive(Default)]
struct BusState {
    buffer: VecDeque<EventEnvelope>,
    active: HashSet<Uuid>,
    finished: VecDeque<EventEnvelope>,
}

impl BusState {
    fn record(&mut self, envelope: &EventEnvelope, replay_capacity: usize) {
        if self.buffer.len() == replay_capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(envelope.clone());

        let request_id = envelope.event.request_id();
        if envelope.event.is_terminal() {
            self.active.remove(&request_id);
            self.finished
                .retain(|item| item.event.request_id() != request_id);
            if self.finished.len() == DEFAULT_FINISHED_CAPACITY {
                self.finished.pop_front();
            }
            self.finished.push_back(envelope.clone());
        } else {
            self.active.insert(request_id);
        }
    }

    fn status(&self, request_id: Uuid) -> RunStatus {
        if self.active.contains(&request_id) {
            return RunStatus::Active;
        }
        self.finished
            .iter()
            .rev()
            .find(|item| item.event.request_id() == request_id)
            .map_or(RunStatus::Unknown, |item| RunStatus::Finished(item.clone()))
    }
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    state: Arc<Mutex<BusState>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, so dropped events affect both structures consistently. A zero
    /// capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            state: Arc::new(Mutex::new(BusState {
                buffer: VecDeque::with_capacity(capacity),
                ..BusState::default()
            })),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        // Ids are assigned under the lock so the ring and the channel both see
        // them in order.
        let mut state = self.lock_state();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        state.record(&envelope, self.replay_capacity);

        // No live subscribers is not an error; the replay buffer still has it.
        let _ = self.sender.send(envelope);
        drop(state);
        id
    }

    /// Subscribe to a single run, replaying every buffered event for it.
    ///
    /// When the run already finished but its terminal event has left the
    /// replay ring, the retained terminal event is replayed last.
    #[must_use]
    pub fn subscribe_run(&self, request_id: Uuid) -> EventStream {
        // Subscribe before snapshotting so nothing published in between is lost;
        // duplicates are filtered by id in `next`.
        let receiver = self.sender.subscribe();
        let state = self.lock_state();
        let mut backlog: VecDeque<EventEnvelope> = state
            .buffer
            .iter()
            .filter(|item| item.event.request_id() == request_id)
            .cloned()
            .collect();
        if let RunStatus::Finished(terminal) = state.status(request_id) {
            backlog.retain(|item| item.id < terminal.id);
            backlog.push_back(terminal);
        }
        let last_replayed = state.buffer.back().map(|item| item.id);
        drop(state);
        EventStream {
            backlog,
            receiver,
            last_replayed,
            run_filter: Some(request_id),
        }
    }

    /// Whether a run is live, finished, or unknown to the bus.
    #[must_use]
    pub fn run_status(&self, request_id: Uuid) -> RunStatus {
        self.lock_state().status(request_id)
    }

    /// Buffered events for a run, oldest first.
    #[must_use]
    pub fn history(&self, request_id: Uuid) -> Vec<EventEnvelope> {
        self.lock_state()
            .buffer
            .iter()
            .filter(|item| item.event.request_id() == request_id)
            .cloned()
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
    last_replayed: Option<EventId>,
    run_filter: Option<Uuid>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    ///
    /// Returns `None` once the bus is dropped.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            let envelope = match self.receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            };
            if self.last_replayed.is_some_and(|last| envelope.id <= last) {
                continue;
            }
            if self
                .run_filter
                .is_some_and(|id| envelope.event.request_id() != id)
            {
                continue;
            }
            return Some(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn progress(id: u128, percent: u8) -> Event {
        Event::Progress {
            request_id: Uuid::from_u128(id),
            percent,
            phase: ProgressPhase::Uploading,
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(progress(1, i * 10));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe_run(Uuid::from_u128(1));
        let _ = bus.publish(progress(1, 60));
        let mut received = Vec::new();
        for _ in 0..6 {
            if let Some(event) = timeout(RECV_TIMEOUT, stream.next()).await? {
                received.push(event.id);
            }
        }
        assert_eq!(received, vec![1, 2, 3, 4, 5, 6]);
        Ok(())
    }

    #[tokio::test]
    async fn run_subscription_replays_and_filters() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::with_capacity(16);
        let run = Uuid::from_u128(1);
        let _ = bus.publish(progress(1, 10));
        let _ = bus.publish(progress(2, 10));

        let mut stream = bus.subscribe_run(run);
        let _ = bus.publish(progress(2, 20));
        let _ = bus.publish(Event::RunCompleted {
            request_id: run,
            preset: "ebook".into(),
            input_bytes: 10,
            output_bytes: 5,
        });

        let first = timeout(RECV_TIMEOUT, stream.next()).await?.ok_or("closed")?;
        assert!(matches!(first.event, Event::Progress { percent: 10, .. }));
        let second = timeout(RECV_TIMEOUT, stream.next()).await?.ok_or("closed")?;
        assert!(second.event.is_terminal());
        assert_eq!(bus.history(run).len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn replay_buffer_drops_oldest_when_full() {
        let bus = EventBus::with_capacity(2);
        for i in 0..3 {
            let _ = bus.publish(progress(1, i));
        }
        let history = bus.history(Uuid::from_u128(1));
        assert_eq!(history.len(), 2);
        assert_eq!(history.first().map(|item| item.id), Some(2));
    }

    #[tokio::test]
    async fn finished_runs_outlive_the_replay_ring() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::with_capacity(4);
        let run = Uuid::from_u128(7);
        assert_eq!(bus.run_status(run), RunStatus::Unknown);

        let _ = bus.publish(progress(7, 10));
        assert_eq!(bus.run_status(run), RunStatus::Active);
        let terminal = bus.publish(Event::RunFailed {
            request_id: run,
            kind: "timeout".into(),
            message: "compression failed".into(),
        });
        for i in 0..8 {
            let _ = bus.publish(progress(100 + i, 50));
        }
        assert!(bus.history(run).is_empty());
        assert!(matches!(
            bus.run_status(run),
            RunStatus::Finished(ref envelope) if envelope.id == terminal
        ));

        let mut stream = bus.subscribe_run(run);
        let replayed = timeout(RECV_TIMEOUT, stream.next()).await?.ok_or("closed")?;
        assert_eq!(replayed.id, terminal);
        assert!(replayed.event.is_terminal());
        Ok(())
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe_run(Uuid::from_u128(1));

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500_u32 {
                    let _ = bus.publish(progress(1, u8::try_from(i % 100).unwrap_or(0)));
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer stalled")
            .expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }
}

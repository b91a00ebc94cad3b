use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{AttemptOutcome, EventSink, EventType, FacilitatorEvent};
use crate::context::RequestContext;

/// Event pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventsConfig {
    /// Events buffered ahead of the sink. When full, the oldest is dropped.
    pub queue_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct Queue {
    events: VecDeque<FacilitatorEvent>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fire-and-forget event recorder.
///
/// Events go into a bounded queue drained by a single writer task, so at most
/// one sink insert is in flight at any time. When the queue is full the
/// oldest queued event is evicted. Sink errors and panics are logged and
/// swallowed.
///
/// Cloning is cheap; all clones feed the same queue.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    shared: Arc<Shared>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventRecorder {
    /// Starts the writer task for `sink`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, config: &EventsConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            notify: Notify::new(),
            capacity: config.queue_capacity.max(1),
            dropped: AtomicU64::new(0),
        });
        let writer = tokio::spawn(write_events(Arc::clone(&shared), sink));
        Self {
            shared,
            writer: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Builds the event for one attempt and queues it. Never blocks on the sink.
    pub fn record_outcome(&self, ctx: &RequestContext, event_type: EventType, outcome: AttemptOutcome) {
        self.enqueue(FacilitatorEvent::new(ctx, event_type, outcome));
    }

    /// Queues a prebuilt event.
    pub fn enqueue(&self, event: FacilitatorEvent) {
        {
            let mut queue = self.shared.lock();
            if queue.closed {
                tracing::debug!(request_id = %event.request_id, "Event recorder is shut down, event discarded");
                return;
            }
            if queue.events.len() >= self.shared.capacity {
                if let Some(evicted) = queue.events.pop_front() {
                    let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        request_id = %evicted.request_id,
                        facilitator = %evicted.facilitator_name,
                        dropped,
                        "Event queue full, dropped oldest event"
                    );
                }
            }
            queue.events.push_back(event);
        }
        self.shared.notify.notify_one();
    }

    /// Events evicted because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Events waiting for the writer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().events.len()
    }

    /// Stops accepting events, flushes the queue and waits for the writer.
    ///
    /// Later calls, from any clone, return immediately.
    pub async fn shutdown(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_one();

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                tracing::error!(error = %e, "Event writer task failed");
            }
            tracing::info!(dropped = self.dropped(), "Event recorder flushed");
        }
    }
}

async fn write_events(shared: Arc<Shared>, sink: Arc<dyn EventSink>) {
    loop {
        let next = {
            let mut queue = shared.lock();
            match queue.events.pop_front() {
                Some(event) => Some(event),
                None if queue.closed => return,
                None => None,
            }
        };
        match next {
            Some(event) => write_one(sink.as_ref(), &event).await,
            None => shared.notify.notified().await,
        }
    }
}

async fn write_one(sink: &dyn EventSink, event: &FacilitatorEvent) {
    match AssertUnwindSafe(sink.insert(event)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(
            request_id = %event.request_id,
            facilitator = %event.facilitator_name,
            error = %e,
            "Failed to persist facilitator event"
        ),
        Err(_) => tracing::error!(
            request_id = %event.request_id,
            facilitator = %event.facilitator_name,
            "Event sink panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InMemorySink, SinkError};
    use crate::proto::PaymentMethod;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn outcome(facilitator: &str) -> AttemptOutcome {
        AttemptOutcome::new(facilitator, PaymentMethod::Verify, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_events() {
        let sink = Arc::new(InMemorySink::new());
        let recorder = EventRecorder::new(sink.clone(), &EventsConfig::default());
        let ctx = RequestContext::new(None, None);

        recorder.record_outcome(&ctx, EventType::Failure, outcome("a"));
        recorder.record_outcome(&ctx, EventType::Success, outcome("b"));
        recorder.shutdown().await;

        let names: Vec<_> = sink.events().into_iter().map(|e| e.facilitator_name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(recorder.pending(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_the_oldest() {
        let sink = Arc::new(InMemorySink::new());
        let recorder = EventRecorder::new(sink.clone(), &EventsConfig { queue_capacity: 2 });
        let ctx = RequestContext::new(None, None);

        // the writer cannot run before the first await on this current-thread runtime
        for name in ["a", "b", "c", "d", "e"] {
            recorder.record_outcome(&ctx, EventType::Failure, outcome(name));
        }
        assert_eq!(recorder.pending(), 2);
        assert_eq!(recorder.dropped(), 3);

        recorder.shutdown().await;
        let names: Vec<_> = sink.events().into_iter().map(|e| e.facilitator_name).collect();
        assert_eq!(names, ["d", "e"]);
    }

    #[derive(Debug, Default)]
    struct UnreliableSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventSink for UnreliableSink {
        async fn insert(&self, event: &FacilitatorEvent) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match event.facilitator_name.as_str() {
                "error" => Err(SinkError::new("collector unavailable")),
                "panic" => panic!("sink bug"),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_sink_errors_and_panics_are_contained() {
        let sink = Arc::new(UnreliableSink::default());
        let recorder = EventRecorder::new(sink.clone(), &EventsConfig::default());
        let ctx = RequestContext::new(None, None);

        for name in ["error", "panic", "ok"] {
            recorder.record_outcome(&ctx, EventType::Failure, outcome(name));
        }
        recorder.shutdown().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_events_after_shutdown_are_discarded() {
        let sink = Arc::new(InMemorySink::new());
        let recorder = EventRecorder::new(sink.clone(), &EventsConfig::default());
        recorder.shutdown().await;

        let ctx = RequestContext::new(None, None);
        recorder.clone().record_outcome(&ctx, EventType::Success, outcome("late"));
        recorder.shutdown().await;

        assert!(sink.is_empty());
        assert_eq!(recorder.pending(), 0);
    }
}

//! Run Event Bus
//!
//! One ordered stream of [`StreamEvent`]s per run. Tool activity is queued as
//! side events and flushed FIFO after each text chunk and once more when the
//! run finishes, so nothing is lost when a model stream ends abruptly.
//! Dropping the consumer end cancels the run cooperatively.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use appforge_core::{EventPayload, StreamEvent};

/// Consumer end of a run's events.
pub type EventStream = ReceiverStream<StreamEvent>;

/// Default capacity of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Producer end of a run's events.
pub struct EventBus {
    tx: mpsc::Sender<StreamEvent>,
    side_tx: mpsc::UnboundedSender<EventPayload>,
    side_rx: Mutex<mpsc::UnboundedReceiver<EventPayload>>,
    cancellation_token: CancellationToken,
}

impl EventBus {
    /// Create a bus and the stream its events are delivered on.
    pub fn channel(capacity: usize) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (side_tx, side_rx) = mpsc::unbounded_channel();
        let bus = Self {
            tx,
            side_tx,
            side_rx: Mutex::new(side_rx),
            cancellation_token: CancellationToken::new(),
        };
        (bus, ReceiverStream::new(rx))
    }

    /// Sender for side events; handed to tools.
    pub fn side_sender(&self) -> mpsc::UnboundedSender<EventPayload> {
        self.side_tx.clone()
    }

    /// Queue a side event for the next flush.
    pub fn queue(&self, payload: EventPayload) {
        let _ = self.side_tx.send(payload);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Whether the consumer has gone away (or the run was cancelled).
    pub fn is_cancelled(&self) -> bool {
        if self.tx.is_closed() {
            self.cancellation_token.cancel();
        }
        self.cancellation_token.is_cancelled()
    }

    /// Timestamp and deliver one event.
    pub async fn emit(&self, payload: EventPayload) {
        if self.cancellation_token.is_cancelled() {
            return;
        }
        if self.tx.send(StreamEvent::now(payload)).await.is_err() {
            tracing::debug!("event consumer dropped, cancelling run");
            self.cancellation_token.cancel();
        }
    }

    pub async fn status(&self, message: impl Into<String>) {
        self.emit(EventPayload::Status {
            message: message.into(),
        })
        .await;
    }

    /// Deliver a text chunk followed by every queued side event.
    pub async fn emit_text(&self, content: impl Into<String>) {
        self.emit(EventPayload::TextDelta {
            content: content.into(),
        })
        .await;
        self.flush_side_events().await;
    }

    /// Deliver queued side events in the order they were queued.
    pub async fn flush_side_events(&self) {
        for payload in self.drain_side_events() {
            self.emit(payload).await;
        }
    }

    fn drain_side_events(&self) -> Vec<EventPayload> {
        let Ok(mut rx) = self.side_rx.lock() else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            drained.push(payload);
        }
        drained
    }

    /// Final flush, then the terminal event.
    pub async fn finish(&self, terminal: EventPayload) {
        self.flush_side_events().await;
        self.emit(terminal).await;
    }
}

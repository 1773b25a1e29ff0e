//! Audit event recording.
//!
//! Recorders hand events to a broadcaster task which logs them and writes
//! them to an [`EventSink`]. Recording never blocks a reconcile pass and a
//! failed write only produces a log line.

use std::sync::Arc;

use chrono::Utc;
use cnat_events::{ClusterEvent, EventSink, EventType, ObjectReference};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

enum Message {
    Record(ClusterEvent),
    Stop,
}

/// Background task delivering recorded events to a sink.
pub struct EventBroadcaster {
    tx: mpsc::UnboundedSender<Message>,
    handle: JoinHandle<()>,
}

impl EventBroadcaster {
    /// Spawn the delivery task. Must be called within a tokio runtime.
    pub fn start(sink: Arc<dyn EventSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Record(event) => deliver(sink.as_ref(), event).await,
                    Message::Stop => break,
                }
            }
        });
        Self { tx, handle }
    }

    /// A recorder attributing its events to `component`.
    #[must_use]
    pub fn new_recorder(&self, component: impl Into<String>) -> EventRecorder {
        EventRecorder {
            tx: self.tx.clone(),
            component: component.into(),
        }
    }

    /// Deliver everything recorded so far, then stop.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Message::Stop);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Event broadcaster terminated abnormally");
        }
    }
}

async fn deliver(sink: &dyn EventSink, event: ClusterEvent) {
    info!(
        object = %format!("{}/{}", event.involved_object.namespace, event.involved_object.name),
        kind = %event.involved_object.kind,
        event_type = %event.event_type,
        reason = %event.reason,
        "{}",
        event.message
    );
    if let Err(e) = sink.create_event(event).await {
        warn!(error = %e, "Failed to write event");
    }
}

/// Records audit events about objects.
#[derive(Clone)]
pub struct EventRecorder {
    tx: mpsc::UnboundedSender<Message>,
    component: String,
}

impl EventRecorder {
    pub fn event(
        &self,
        object: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: impl Into<String>,
    ) {
        let event = ClusterEvent {
            involved_object: object,
            event_type,
            reason: reason.to_string(),
            message: message.into(),
            source: self.component.clone(),
            timestamp: Utc::now(),
        };
        if self.tx.send(Message::Record(event)).is_err() {
            warn!(reason, "Event broadcaster stopped, dropping event");
        }
    }

    pub fn normal(&self, object: ObjectReference, reason: &str, message: impl Into<String>) {
        self.event(object, EventType::Normal, reason, message);
    }

    pub fn warning(&self, object: ObjectReference, reason: &str, message: impl Into<String>) {
        self.event(object, EventType::Warning, reason, message);
    }
}

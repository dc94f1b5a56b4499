//! Outbound notifications for subsystems that react to session outcomes
//! (badges, analytics, streak tracking). Delivery is fire-and-forget.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::sessions::SessionEvent;

/// Receiver for session events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SessionEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &SessionEvent) {}
}

/// Logs each event as a JSON payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &SessionEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(target: "learnpath::events", %payload, "session event"),
            Err(err) => warn!(target: "learnpath::events", error = %err, "unserializable session event"),
        }
    }
}

/// Keeps events in memory; handy in tests and scripted runs.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl CollectingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &SessionEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}

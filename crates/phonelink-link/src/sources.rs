//! A telemetry source driven by explicit setters.
//!
//! Used by the `phonelink` binary (fed from stdin) and by tests. Platform
//! integrations implement [`TelemetrySource`] directly on top of their call
//! log, message store and battery broadcasts.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::collaborators::TelemetrySource;
use crate::events::TelemetrySink;

/// Telemetry source whose values are set by hand.
#[derive(Debug, Default)]
pub struct ManualTelemetrySource {
    missed_calls: AtomicU32,
    unread_messages: AtomicU32,
    sinks: Mutex<Vec<TelemetrySink>>,
    subscriptions: AtomicUsize,
}

impl ManualTelemetrySource {
    /// Create a source with both counts at the given values.
    pub fn new(missed_calls: u32, unread_messages: u32) -> Self {
        ManualTelemetrySource {
            missed_calls: AtomicU32::new(missed_calls),
            unread_messages: AtomicU32::new(unread_messages),
            ..Default::default()
        }
    }

    /// Set the missed-call count and notify subscribers.
    pub fn set_missed_calls(&self, count: u32) {
        self.missed_calls.store(count, Ordering::SeqCst);
        for sink in self.sinks.lock().iter() {
            sink.missed_calls(count);
        }
    }

    /// Set the unread-message count and notify subscribers.
    pub fn set_unread_messages(&self, count: u32) {
        self.unread_messages.store(count, Ordering::SeqCst);
        for sink in self.sinks.lock().iter() {
            sink.unread_messages(count);
        }
    }

    /// Change the unread-message count without notifying anyone, as a
    /// message store that has no "message read" notification does.
    pub fn set_unread_messages_quietly(&self, count: u32) {
        self.unread_messages.store(count, Ordering::SeqCst);
    }

    /// Report a battery change to subscribers.
    pub fn set_battery(&self, percent: u8, full: bool) {
        for sink in self.sinks.lock().iter() {
            sink.battery(percent, full);
        }
    }

    /// Number of times [`subscribe`](TelemetrySource::subscribe) was called.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl TelemetrySource for ManualTelemetrySource {
    fn missed_call_count(&self) -> u32 {
        self.missed_calls.load(Ordering::SeqCst)
    }

    fn unread_message_count(&self) -> u32 {
        self.unread_messages.load(Ordering::SeqCst)
    }

    fn subscribe(&self, sink: TelemetrySink) {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().push(sink);
    }
}

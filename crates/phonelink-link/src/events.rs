//! Events flowing into the connection manager.
//!
//! Listener threads, session threads and telemetry sources never touch the
//! manager's state directly. They post a [`LinkEvent`] on the manager's
//! channel and its dispatcher thread applies them one at a time.

use crossbeam_channel::Sender;
use phonelink_protocol::AccessoryDescriptor;

use crate::transport::Connection;

/// Something the connection manager must react to.
#[derive(Debug)]
pub enum LinkEvent {
    /// A listener accepted a channel.
    Accepted {
        /// Id of the listener that accepted it.
        listener: u64,
        /// The new channel.
        connection: Connection,
    },

    /// A listener's accept call failed; that listener has stopped.
    AcceptFailed {
        /// Id of the failed listener.
        listener: u64,
        /// Error description.
        reason: String,
    },

    /// A session decoded the accessory's descriptor.
    Descriptor {
        /// Id of the reporting session.
        session: u64,
        /// The decoded descriptor.
        descriptor: AccessoryDescriptor,
    },

    /// A session's channel failed; that session has stopped.
    ConnectionLost {
        /// Id of the lost session.
        session: u64,
        /// Error description.
        reason: String,
    },

    /// A telemetry value changed.
    Telemetry(TelemetryUpdate),

    /// Stop the dispatcher.
    Shutdown,
}

/// A change reported by a telemetry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryUpdate {
    /// New missed-call count.
    MissedCalls(u32),
    /// New unread-message count.
    UnreadMessages(u32),
    /// New battery state.
    Battery {
        /// Charge in percent.
        percent: u8,
        /// Whether the battery reports full.
        full: bool,
    },
}

/// Handle through which a telemetry source reports changes.
///
/// Cheap to clone. Reports after the manager has shut down are dropped.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    events: Sender<LinkEvent>,
}

impl TelemetrySink {
    pub(crate) fn new(events: Sender<LinkEvent>) -> Self {
        TelemetrySink { events }
    }

    /// Report a new missed-call count.
    pub fn missed_calls(&self, count: u32) {
        self.push(TelemetryUpdate::MissedCalls(count));
    }

    /// Report a new unread-message count.
    pub fn unread_messages(&self, count: u32) {
        self.push(TelemetryUpdate::UnreadMessages(count));
    }

    /// Report a new battery state.
    pub fn battery(&self, percent: u8, full: bool) {
        self.push(TelemetryUpdate::Battery { percent, full });
    }

    /// Report any update.
    pub fn push(&self, update: TelemetryUpdate) {
        let _ = self.events.send(LinkEvent::Telemetry(update));
    }
}

//! Interfaces to the world outside the link.
//!
//! The manager consumes telemetry from a [`TelemetrySource`] and pushes what
//! happens on the link to a [`Presenter`] and a [`StatusArea`]. Presenter and
//! status callbacks run on the manager's threads with its state lock held, so
//! implementations must return promptly and must not call back into the
//! manager.

use crossbeam_channel::{Receiver, Sender};
use phonelink_protocol::{AccessoryDescriptor, TelemetrySnapshot};

use crate::events::TelemetrySink;
use crate::state::ConnectionState;

/// Provider of the missed-call and unread-message counts.
///
/// Battery state is push-only and arrives through the sink.
pub trait TelemetrySource: Send + Sync {
    /// Current number of missed calls.
    fn missed_call_count(&self) -> u32;

    /// Current number of unread messages.
    fn unread_message_count(&self) -> u32;

    /// Start reporting changes to `sink`. Called once per manager.
    fn subscribe(&self, sink: TelemetrySink);
}

/// Receiver of link events meant for the user interface.
pub trait Presenter: Send + Sync {
    /// The connection state changed.
    fn on_state_changed(&self, _state: ConnectionState) {}

    /// The accessory described itself.
    fn on_descriptor_received(&self, _descriptor: &AccessoryDescriptor) {}

    /// An accessory connected; `name` identifies the remote device.
    fn on_device_identified(&self, _name: &str) {}

    /// A short transient message for the user.
    fn on_user_message(&self, _text: &str) {}

    /// The telemetry snapshot was refreshed.
    fn on_telemetry(&self, _snapshot: &TelemetrySnapshot) {}
}

/// Persistent one-line summary of the link, e.g. a notification drawer entry.
pub trait StatusArea: Send + Sync {
    /// Replace the summary.
    fn show_status(&self, text: &str);
}

/// Everything a [`ChannelPresenter`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterEvent {
    /// See [`Presenter::on_state_changed`].
    StateChanged(ConnectionState),
    /// See [`Presenter::on_descriptor_received`].
    Descriptor(AccessoryDescriptor),
    /// See [`Presenter::on_device_identified`].
    DeviceIdentified(String),
    /// See [`Presenter::on_user_message`].
    UserMessage(String),
    /// See [`Presenter::on_telemetry`].
    Telemetry(TelemetrySnapshot),
    /// See [`StatusArea::show_status`].
    Status(String),
}

/// Presenter and status area that forward everything over a channel.
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: Sender<PresenterEvent>,
}

impl ChannelPresenter {
    /// Create a presenter and the receiving end of its channel.
    pub fn new() -> (ChannelPresenter, Receiver<PresenterEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (ChannelPresenter { tx }, rx)
    }

    fn emit(&self, event: PresenterEvent) {
        let _ = self.tx.send(event);
    }
}

impl Presenter for ChannelPresenter {
    fn on_state_changed(&self, state: ConnectionState) {
        self.emit(PresenterEvent::StateChanged(state));
    }

    fn on_descriptor_received(&self, descriptor: &AccessoryDescriptor) {
        self.emit(PresenterEvent::Descriptor(descriptor.clone()));
    }

    fn on_device_identified(&self, name: &str) {
        self.emit(PresenterEvent::DeviceIdentified(name.to_string()));
    }

    fn on_user_message(&self, text: &str) {
        self.emit(PresenterEvent::UserMessage(text.to_string()));
    }

    fn on_telemetry(&self, snapshot: &TelemetrySnapshot) {
        self.emit(PresenterEvent::Telemetry(*snapshot));
    }
}

impl StatusArea for ChannelPresenter {
    fn show_status(&self, text: &str) {
        self.emit(PresenterEvent::Status(text.to_string()));
    }
}

/// Human-readable summary for the status area.
pub fn status_summary(state: ConnectionState, descriptor: Option<&AccessoryDescriptor>) -> String {
    match (state, descriptor) {
        (ConnectionState::Connected, Some(d)) => format!("Connected to: {}", d.kind),
        (ConnectionState::Connected, None) => "Connected".to_string(),
        (ConnectionState::Connecting, _) => "Connecting".to_string(),
        (ConnectionState::Listening, _) => "Waiting for accessory".to_string(),
        (ConnectionState::None, _) => "Disconnected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_presenter_forwards() {
        let (presenter, rx) = ChannelPresenter::new();
        presenter.on_state_changed(ConnectionState::Listening);
        presenter.on_user_message("hi");
        presenter.show_status("Waiting for accessory");

        assert_eq!(rx.try_recv().unwrap(), PresenterEvent::StateChanged(ConnectionState::Listening));
        assert_eq!(rx.try_recv().unwrap(), PresenterEvent::UserMessage("hi".to_string()));
        assert_eq!(rx.try_recv().unwrap(), PresenterEvent::Status("Waiting for accessory".to_string()));
    }

    #[test]
    fn test_status_summary() {
        let dock = AccessoryDescriptor {
            kind: "dock".to_string(),
            intensity: 7,
            height: 64,
            width: 128,
        };
        assert_eq!(status_summary(ConnectionState::Connected, Some(&dock)), "Connected to: dock");
        assert_eq!(status_summary(ConnectionState::Connected, None), "Connected");
        assert_eq!(status_summary(ConnectionState::None, Some(&dock)), "Disconnected");
        assert_eq!(status_summary(ConnectionState::Listening, None), "Waiting for accessory");
    }
}

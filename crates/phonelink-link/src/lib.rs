//! Host side of the PhoneLink accessory link.
//!
//! This crate keeps one accessory connected over a serial-style byte stream
//! and keeps it informed of missed calls, unread messages and battery state.
//!
//! - [`ConnectionManager`]: the connection state machine and change suppression
//! - [`SessionWorker`]: one accepted channel and its read loop
//! - [`ListenerTask`]: a single blocking accept
//! - [`transport`]: TCP and in-memory byte-stream transports
//! - [`collaborators`]: telemetry source, presenter and status area traits
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use phonelink_link::{
//!     ChannelPresenter, ConnectionManager, ConnectionState, LinkConfig, ManualTelemetrySource,
//!     MemoryTransport,
//! };
//!
//! let (transport, _dialer) = MemoryTransport::new();
//! let (presenter, _events) = ChannelPresenter::new();
//! let presenter = Arc::new(presenter);
//! let manager = ConnectionManager::new(
//!     Arc::new(transport),
//!     Arc::new(ManualTelemetrySource::new(0, 0)),
//!     presenter.clone(),
//!     presenter,
//!     LinkConfig::default(),
//! )
//! .unwrap();
//!
//! manager.start();
//! assert_eq!(manager.state(), ConnectionState::Listening);
//! manager.shutdown();
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod link_metrics;
pub mod listener;
pub mod manager;
pub mod session;
pub mod sources;
pub mod state;
pub mod transport;

pub use collaborators::{status_summary, ChannelPresenter, Presenter, PresenterEvent, StatusArea, TelemetrySource};
pub use config::{LinkConfig, ReconnectPolicy};
pub use error::{LinkError, LinkResult};
pub use events::{LinkEvent, TelemetrySink, TelemetryUpdate};
pub use link_metrics::describe_metrics;
pub use listener::ListenerTask;
pub use manager::{ConnectionManager, CONNECTION_LOST_MESSAGE};
pub use session::SessionWorker;
pub use sources::ManualTelemetrySource;
pub use state::ConnectionState;
pub use transport::{Closer, Connection, Listener, MemoryDialer, MemoryPeer, MemoryTransport, TcpTransport, Transport};

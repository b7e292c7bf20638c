//! Connection lifecycle orchestration.
//!
//! The [`ConnectionManager`] owns the state machine:
//!
//! ```text
//! None      -> Listening : start()
//! Listening -> Connected : accessory accepted
//! Connected -> None      : connection lost, or stop()
//! Listening -> None      : stop()
//! Connected -> Connected : start() is a no-op
//! ```
//!
//! Callers drive it through [`start`](ConnectionManager::start),
//! [`stop`](ConnectionManager::stop) and
//! [`set_display_intensity`](ConnectionManager::set_display_intensity).
//! Everything else arrives as a [`LinkEvent`] from the listener, the session
//! or the telemetry source, and is applied by a dispatcher thread. State,
//! task handles and both telemetry snapshots sit behind one state mutex.
//!
//! Telemetry pushes are serialized by a separate send lock: the suppression
//! check, the write and the `last_sent` update happen under it, so two
//! triggers never both send the same snapshot. The write itself runs without
//! the state lock, so a channel that stops draining can still be closed by
//! [`stop`](ConnectionManager::stop). Lock order is send lock, then state.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use metrics::counter;
use parking_lot::Mutex;
use phonelink_protocol::{should_send, AccessoryDescriptor, HostFrame, TelemetrySnapshot};
use tracing::{debug, error, info, trace, warn};

use crate::collaborators::{status_summary, Presenter, StatusArea, TelemetrySource};
use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::events::{LinkEvent, TelemetrySink, TelemetryUpdate};
use crate::link_metrics::metric_defs;
use crate::listener::ListenerTask;
use crate::session::SessionWorker;
use crate::state::ConnectionState;
use crate::transport::{Connection, Transport};

/// User message shown when an established session drops.
pub const CONNECTION_LOST_MESSAGE: &str = "Device connection was lost";

/// Keeps one accessory connected and up to date.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    source: Arc<dyn TelemetrySource>,
    presenter: Arc<dyn Presenter>,
    status: Arc<dyn StatusArea>,
    config: LinkConfig,
    events: Sender<LinkEvent>,
    /// Serializes telemetry pushes. Never taken while `inner` is held.
    send_lock: Mutex<()>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    listener: Option<ListenerTask>,
    session: Option<Arc<SessionWorker>>,
    descriptor: Option<AccessoryDescriptor>,
    subscribed: bool,
    next_id: u64,
    current: TelemetrySnapshot,
    last_sent: Option<TelemetrySnapshot>,
    /// Losses since the last successful connection.
    reconnect_attempts: u32,
    /// When a delayed restart is due.
    reconnect_at: Option<Instant>,
    shut_down: bool,
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl ConnectionManager {
    /// Create a manager in state `None` and start its dispatcher thread.
    ///
    /// Nothing listens until [`start`](Self::start) is called.
    pub fn new(
        transport: Arc<dyn Transport>,
        source: Arc<dyn TelemetrySource>,
        presenter: Arc<dyn Presenter>,
        status: Arc<dyn StatusArea>,
        config: LinkConfig,
    ) -> LinkResult<ConnectionManager> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            transport,
            source,
            presenter,
            status,
            config,
            events: tx,
            send_lock: Mutex::new(()),
            inner: Mutex::new(Inner::default()),
        });

        let dispatcher_shared = shared.clone();
        let dispatcher = thread::Builder::new()
            .name("link-dispatcher".to_string())
            .spawn(move || dispatch(&dispatcher_shared, &rx))?;

        Ok(ConnectionManager {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Begin listening for the accessory.
    ///
    /// The first call primes the telemetry snapshot from the source and
    /// subscribes to its changes. A no-op while connected or already
    /// listening.
    pub fn start(&self) {
        let mut inner = self.shared.inner.lock();
        inner.reconnect_at = None;
        self.shared.start_locked(&mut inner);
    }

    /// Tear down the listener or session and return to `None`.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock();
        inner.reconnect_at = None;
        self.shared.stop_locked(&mut inner);
    }

    /// Send a display intensity command. Values are clamped to `0..=15`.
    pub fn set_display_intensity(&self, value: i64) -> LinkResult<()> {
        let session = self.shared.inner.lock().session.clone();
        let frame = HostFrame::intensity(value);
        let Some(session) = session else {
            warn!(value, "intensity change with no accessory connected");
            return Err(LinkError::NotConnected);
        };
        self.shared.write_frame(&session, &frame)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Descriptor of the connected accessory, once it has described itself.
    pub fn descriptor(&self) -> Option<AccessoryDescriptor> {
        self.shared.inner.lock().descriptor.clone()
    }

    /// Most recent telemetry snapshot.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.shared.inner.lock().current
    }

    /// Id of the active session, if connected.
    pub fn session_id(&self) -> Option<u64> {
        self.shared.inner.lock().session.as_ref().map(|s| s.id())
    }

    /// Configuration this manager runs with.
    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Re-read the call and message counts from the source and push the
    /// snapshot if it changed.
    pub fn refresh_telemetry(&self) {
        self.shared.refresh_counts(&mut self.shared.inner.lock());
        self.shared.push_telemetry();
    }

    /// Stop the link and the dispatcher thread. Later calls do nothing.
    pub fn shutdown(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if !inner.shut_down {
                info!("shutting down accessory link");
                inner.shut_down = true;
                inner.reconnect_at = None;
                self.shared.stop_locked(&mut inner);
            }
        }
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = self.shared.events.send(LinkEvent::Shutdown);
            if handle.join().is_err() {
                error!("link dispatcher panicked");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &inner.state)
            .field("session", &inner.session.as_ref().map(|s| s.id()))
            .field("descriptor", &inner.descriptor)
            .field("current", &inner.current)
            .finish()
    }
}

fn dispatch(shared: &Shared, events: &Receiver<LinkEvent>) {
    debug!("link dispatcher started");
    loop {
        let deadline = shared.inner.lock().reconnect_at;
        let event = match deadline {
            Some(at) => match events.recv_deadline(at) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match events.recv() {
                Ok(event) => Some(event),
                Err(_) => break,
            },
        };

        match event {
            None => shared.reconnect_due(),
            Some(LinkEvent::Shutdown) => break,
            Some(event) => shared.handle(event),
        }
    }
    debug!("link dispatcher stopped");
}

/// Cancel a listener and wait for its thread, which owns the endpoint, so
/// the address is free again on return.
fn retire_listener(task: ListenerTask) {
    let id = task.id();
    if !task.stop() {
        error!(listener = id, "listener thread panicked");
    }
}

impl Shared {
    fn handle(&self, event: LinkEvent) {
        let push = {
            let mut inner = self.inner.lock();
            if inner.shut_down {
                if let LinkEvent::Accepted { connection, .. } = event {
                    connection.closer.close();
                }
                return;
            }
            match event {
                LinkEvent::Accepted { listener, connection } => self.on_accepted(&mut inner, listener, connection),
                LinkEvent::AcceptFailed { listener, reason } => {
                    self.on_accept_failed(&mut inner, listener, &reason);
                    false
                }
                LinkEvent::Descriptor { session, descriptor } => {
                    self.on_descriptor(&mut inner, session, descriptor);
                    false
                }
                LinkEvent::ConnectionLost { session, reason } => {
                    self.on_connection_lost(&mut inner, session, &reason);
                    false
                }
                LinkEvent::Telemetry(update) => {
                    self.on_telemetry(&mut inner, update);
                    true
                }
                LinkEvent::Shutdown => false,
            }
        };
        if push {
            self.push_telemetry();
        }
    }

    fn start_locked(&self, inner: &mut Inner) {
        if inner.shut_down {
            warn!("start after shutdown ignored");
            return;
        }
        if inner.state == ConnectionState::Connected {
            debug!("already connected, start ignored");
            return;
        }

        if !inner.subscribed {
            inner.subscribed = true;
            inner.current.missed_calls = self.source.missed_call_count();
            inner.current.unread_messages = self.source.unread_message_count();
            self.source.subscribe(TelemetrySink::new(self.events.clone()));
            debug!(snapshot = %inner.current, "subscribed to telemetry source");
        }

        if inner.listener.is_none() {
            let id = inner.allocate_id();
            match ListenerTask::spawn(id, self.transport.as_ref(), &self.config.service_name, self.events.clone()) {
                Ok(task) => {
                    info!(listener = id, service = %self.config.service_name, "listening for accessory");
                    inner.listener = Some(task);
                }
                Err(e) => {
                    warn!(listener = id, error = %e, "could not open listening endpoint");
                    counter!(metric_defs::ACCEPT_FAILURES.name).increment(1);
                    self.presenter
                        .on_user_message(&format!("Could not create accessory service: {}", e));
                }
            }
        }

        self.set_state(inner, ConnectionState::Listening);
    }

    fn stop_locked(&self, inner: &mut Inner) {
        if let Some(listener) = inner.listener.take() {
            retire_listener(listener);
        }
        if let Some(session) = inner.session.take() {
            session.cancel();
        }
        inner.descriptor = None;
        inner.last_sent = None;
        self.set_state(inner, ConnectionState::None);
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        let previous = inner.state;
        inner.state = state;
        if previous == state {
            return;
        }
        info!(from = %previous, to = %state, "link state changed");
        self.presenter.on_state_changed(state);
        self.publish_status(inner);
    }

    fn publish_status(&self, inner: &Inner) {
        self.status
            .show_status(&status_summary(inner.state, inner.descriptor.as_ref()));
    }

    /// Promote an accepted channel to the active session. Returns whether
    /// the telemetry snapshot should be pushed to it.
    fn on_accepted(&self, inner: &mut Inner, listener: u64, connection: Connection) -> bool {
        match inner.listener.as_ref() {
            Some(task) if task.id() == listener => {}
            _ => {
                debug!(listener, peer = %connection.peer, "dropping connection from stale listener");
                connection.closer.close();
                return false;
            }
        }
        if let Some(task) = inner.listener.take() {
            retire_listener(task);
        }

        inner.state = ConnectionState::Connecting;
        let peer = connection.peer.clone();
        let id = inner.allocate_id();
        match SessionWorker::spawn(id, connection, self.events.clone()) {
            Ok(session) => {
                counter!(metric_defs::SESSIONS_OPENED.name).increment(1);
                info!(session = id, %peer, "session opened");
                inner.session = Some(session);
                inner.reconnect_attempts = 0;
                self.set_state(inner, ConnectionState::Connected);
                self.presenter.on_device_identified(&peer);
                self.refresh_counts(inner);
                true
            }
            Err(e) => {
                error!(session = id, %peer, error = %e, "could not start session");
                inner.state = ConnectionState::Listening;
                self.start_locked(inner);
                false
            }
        }
    }

    fn on_accept_failed(&self, inner: &mut Inner, listener: u64, reason: &str) {
        if inner.listener.as_ref().map(|t| t.id()) != Some(listener) {
            debug!(listener, "ignoring failure from stale listener");
            return;
        }
        if let Some(task) = inner.listener.take() {
            retire_listener(task);
        }
        counter!(metric_defs::ACCEPT_FAILURES.name).increment(1);
        self.presenter
            .on_user_message(&format!("Accessory connection failed: {}", reason));
    }

    fn on_descriptor(&self, inner: &mut Inner, session: u64, descriptor: AccessoryDescriptor) {
        if inner.session.as_ref().map(|s| s.id()) != Some(session) {
            debug!(session, "ignoring descriptor from stale session");
            return;
        }
        self.presenter.on_descriptor_received(&descriptor);
        inner.descriptor = Some(descriptor);
        self.publish_status(inner);
    }

    fn on_connection_lost(&self, inner: &mut Inner, session: u64, reason: &str) {
        if inner.session.as_ref().map(|s| s.id()) != Some(session) {
            debug!(session, "ignoring loss of stale session");
            return;
        }
        inner.session = None;
        inner.last_sent = None;
        inner.descriptor = None;
        counter!(metric_defs::CONNECTIONS_LOST.name).increment(1);
        info!(session, reason, "session ended");

        self.presenter.on_user_message(CONNECTION_LOST_MESSAGE);
        self.set_state(inner, ConnectionState::None);

        inner.reconnect_attempts = inner.reconnect_attempts.saturating_add(1);
        let delay = self.config.reconnect.delay(inner.reconnect_attempts);
        if delay.is_zero() {
            self.start_locked(inner);
        } else {
            debug!(delay_ms = delay.as_millis() as u64, attempt = inner.reconnect_attempts, "delaying restart");
            inner.reconnect_at = Some(Instant::now() + delay);
        }
    }

    fn reconnect_due(&self) {
        let mut inner = self.inner.lock();
        match inner.reconnect_at {
            Some(at) if at <= Instant::now() => {
                inner.reconnect_at = None;
                self.start_locked(&mut inner);
            }
            _ => {}
        }
    }

    fn on_telemetry(&self, inner: &mut Inner, update: TelemetryUpdate) {
        trace!(?update, "telemetry update");
        match update {
            TelemetryUpdate::MissedCalls(count) => inner.current.missed_calls = count,
            TelemetryUpdate::UnreadMessages(count) => inner.current.unread_messages = count,
            TelemetryUpdate::Battery { percent, full } => {
                inner.current.set_battery(percent, full);
                // The message store has no "read" notification.
                inner.current.unread_messages = self.source.unread_message_count();
            }
        }
        self.presenter.on_telemetry(&inner.current);
    }

    fn refresh_counts(&self, inner: &mut Inner) {
        inner.current.missed_calls = self.source.missed_call_count();
        inner.current.unread_messages = self.source.unread_message_count();
        self.presenter.on_telemetry(&inner.current);
    }

    /// Send the current snapshot to the active session unless it was the
    /// last one sent. Must be called without `inner` held.
    fn push_telemetry(&self) {
        let _send = self.send_lock.lock();
        let (session, snapshot) = {
            let inner = self.inner.lock();
            let Some(session) = inner.session.clone() else {
                return;
            };
            if !should_send(&inner.current, inner.last_sent.as_ref()) {
                trace!(session = session.id(), "telemetry unchanged, not sent");
                counter!(metric_defs::TELEMETRY_SUPPRESSED.name).increment(1);
                return;
            }
            (session, inner.current)
        };

        if self.write_frame(&session, &HostFrame::Status(snapshot)).is_err() {
            return;
        }
        let mut inner = self.inner.lock();
        // A stop or reconnect while writing starts the new session from scratch.
        if inner.session.as_ref().map(|s| s.id()) == Some(session.id()) {
            inner.last_sent = Some(snapshot);
        }
    }

    fn write_frame(&self, session: &SessionWorker, frame: &HostFrame) -> LinkResult<()> {
        match session.write(&frame.encode()) {
            Ok(()) => {
                debug!(session = session.id(), %frame, "frame sent");
                counter!(metric_defs::FRAMES_SENT.name, "kind" => frame.kind()).increment(1);
                Ok(())
            }
            Err(e) => {
                warn!(session = session.id(), %frame, error = %e, "failed to send frame");
                counter!(metric_defs::WRITE_FAILURES.name).increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ChannelPresenter, PresenterEvent};
    use crate::sources::ManualTelemetrySource;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct Fixture {
        manager: ConnectionManager,
        transport: MemoryTransport,
        dialer: crate::transport::MemoryDialer,
        source: Arc<ManualTelemetrySource>,
        events: crossbeam_channel::Receiver<PresenterEvent>,
    }

    fn fixture(config: LinkConfig) -> Fixture {
        let (transport, dialer) = MemoryTransport::new();
        let source = Arc::new(ManualTelemetrySource::new(1, 2));
        let (presenter, events) = ChannelPresenter::new();
        let presenter = Arc::new(presenter);
        let manager = ConnectionManager::new(
            Arc::new(transport.clone()),
            source.clone(),
            presenter.clone(),
            presenter,
            config,
        )
        .unwrap();
        Fixture {
            manager,
            transport,
            dialer,
            source,
            events,
        }
    }

    fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
        let deadline = Instant::now() + TIMEOUT;
        while manager.state() != state {
            assert!(Instant::now() < deadline, "timed out waiting for {}", state);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_new_manager_is_idle() {
        let f = fixture(LinkConfig::default());
        assert_eq!(f.manager.state(), ConnectionState::None);
        assert_eq!(f.manager.session_id(), None);
        assert_eq!(f.transport.listen_count(), 0);
        assert_eq!(f.source.subscriptions(), 0);
    }

    #[test]
    fn test_start_primes_and_subscribes_once() {
        let f = fixture(LinkConfig::default());
        f.manager.start();
        f.manager.start();
        f.manager.stop();
        f.manager.start();

        assert_eq!(f.source.subscriptions(), 1);
        assert_eq!(f.manager.telemetry().missed_calls, 1);
        assert_eq!(f.manager.telemetry().unread_messages, 2);
        assert_eq!(f.manager.state(), ConnectionState::Listening);
    }

    #[test]
    fn test_start_twice_keeps_one_listener() {
        let f = fixture(LinkConfig::default());
        f.manager.start();
        f.manager.start();
        assert_eq!(f.transport.listen_count(), 1);
        assert_eq!(f.transport.service_name().as_deref(), Some("PhoneInfoAcc"));
    }

    #[test]
    fn test_listens_under_configured_service_name() {
        let f = fixture(LinkConfig {
            service_name: "Dashboard".to_string(),
            ..LinkConfig::default()
        });
        f.manager.start();
        assert_eq!(f.transport.service_name().as_deref(), Some("Dashboard"));
    }

    #[test]
    fn test_stop_from_listening() {
        let f = fixture(LinkConfig::default());
        f.manager.start();
        f.manager.stop();
        assert_eq!(f.manager.state(), ConnectionState::None);

        let seen: Vec<_> = f.events.try_iter().collect();
        assert!(seen.contains(&PresenterEvent::StateChanged(ConnectionState::Listening)));
        assert!(seen.contains(&PresenterEvent::Status("Waiting for accessory".to_string())));
        assert_eq!(seen.last(), Some(&PresenterEvent::Status("Disconnected".to_string())));
    }

    #[test]
    fn test_listen_failure_reports_user_message() {
        let f = fixture(LinkConfig::default());
        f.transport.refuse_listen(true);
        f.manager.start();

        assert_eq!(f.manager.state(), ConnectionState::Listening);
        let seen: Vec<_> = f.events.try_iter().collect();
        assert!(seen
            .iter()
            .any(|e| matches!(e, PresenterEvent::UserMessage(m) if m.starts_with("Could not create accessory service"))));

        // A later start retries the endpoint.
        f.transport.refuse_listen(false);
        f.manager.start();
        assert_eq!(f.transport.listen_count(), 1);
    }

    #[test]
    fn test_intensity_without_session() {
        let f = fixture(LinkConfig::default());
        assert!(matches!(f.manager.set_display_intensity(3), Err(LinkError::NotConnected)));
    }

    #[test]
    fn test_backoff_delays_restart() {
        let config = LinkConfig {
            reconnect: crate::config::ReconnectPolicy::Backoff {
                initial_ms: 100,
                max_ms: 100,
            },
            ..LinkConfig::default()
        };
        let f = fixture(config);
        f.manager.start();
        let peer = f.dialer.connect("dock-01");
        wait_for_state(&f.manager, ConnectionState::Connected);

        peer.close();
        wait_for_state(&f.manager, ConnectionState::None);
        assert_eq!(f.transport.listen_count(), 1);

        wait_for_state(&f.manager, ConnectionState::Listening);
        assert_eq!(f.transport.listen_count(), 2);
    }

    #[test]
    fn test_stop_cancels_pending_restart() {
        let config = LinkConfig {
            reconnect: crate::config::ReconnectPolicy::Backoff {
                initial_ms: 50,
                max_ms: 50,
            },
            ..LinkConfig::default()
        };
        let f = fixture(config);
        f.manager.start();
        let peer = f.dialer.connect("dock-01");
        wait_for_state(&f.manager, ConnectionState::Connected);

        peer.close();
        wait_for_state(&f.manager, ConnectionState::None);
        f.manager.stop();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(f.manager.state(), ConnectionState::None);
        assert_eq!(f.transport.listen_count(), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let f = fixture(LinkConfig::default());
        f.manager.start();
        f.manager.shutdown();
        f.manager.shutdown();
        assert_eq!(f.manager.state(), ConnectionState::None);

        f.manager.start();
        assert_eq!(f.manager.state(), ConnectionState::None);
    }
}

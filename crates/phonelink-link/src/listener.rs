//! Waiting for the accessory to connect.
//!
//! A [`ListenerTask`] opens a listening endpoint and blocks in a single
//! `accept` on its own thread. The outcome goes back to the manager as a
//! [`LinkEvent`]; after one accept (or one failure) the task is done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::events::LinkEvent;
use crate::transport::{Closer, Transport};

/// Handle to a pending accept.
pub struct ListenerTask {
    id: u64,
    closer: Arc<dyn Closer>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerTask {
    /// Open a listening endpoint on `transport`, advertised as
    /// `service_name`, and wait for one accessory.
    ///
    /// Fails with [`LinkError::Listen`] when the endpoint cannot be opened;
    /// no thread is started in that case.
    pub fn spawn(
        id: u64,
        transport: &dyn Transport,
        service_name: &str,
        events: Sender<LinkEvent>,
    ) -> LinkResult<ListenerTask> {
        let mut listener = transport.listen(service_name).map_err(LinkError::Listen)?;
        let closer = listener.closer();
        let cancelled = Arc::new(AtomicBool::new(false));

        let thread_cancelled = cancelled.clone();
        let thread = thread::Builder::new()
            .name(format!("listener-{}", id))
            .spawn(move || {
                debug!(listener = id, "waiting for accessory");
                let result = listener.accept();
                if thread_cancelled.load(Ordering::SeqCst) {
                    if let Ok(connection) = result {
                        debug!(listener = id, peer = %connection.peer, "dropping connection accepted after cancel");
                        connection.closer.close();
                    }
                    return;
                }
                let event = match result {
                    Ok(connection) => {
                        info!(listener = id, peer = %connection.peer, "accessory connected");
                        LinkEvent::Accepted { listener: id, connection }
                    }
                    Err(e) => {
                        warn!(listener = id, error = %e, "accept failed");
                        LinkEvent::AcceptFailed {
                            listener: id,
                            reason: e.to_string(),
                        }
                    }
                };
                let _ = events.send(event);
            });

        match thread {
            Ok(handle) => Ok(ListenerTask {
                id,
                closer,
                cancelled,
                thread: Some(handle),
            }),
            Err(e) => {
                closer.close();
                Err(LinkError::Io(e))
            }
        }
    }

    /// Listener id, carried on the event this task reports.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Close the endpoint. The thread exits without reporting anything.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(listener = self.id, "cancelling listener");
        self.closer.close();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check if the accept thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancel and wait for the accept thread to exit.
    ///
    /// The thread owns the endpoint, so once this returns the endpoint is
    /// released and the same address can be listened on again.
    pub fn stop(self) -> bool {
        self.cancel();
        self.join()
    }

    /// Wait for the accept thread to exit. Returns false if it panicked.
    pub fn join(mut self) -> bool {
        match self.thread.take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl std::fmt::Debug for ListenerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerTask")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

//! One live channel to the accessory.
//!
//! A [`SessionWorker`] owns an accepted [`Connection`] for as long as it
//! lives. Its thread sends the descriptor query, then blocks reading bytes
//! and feeding them to a [`LineCodec`]. Writes come from other threads
//! through [`SessionWorker::write`] and go straight to the output half, so
//! they never wait on the read loop.

use std::io::{BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use metrics::counter;
use parking_lot::Mutex;
use phonelink_protocol::{HostFrame, LineCodec};
use tracing::{debug, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::events::LinkEvent;
use crate::link_metrics::metric_defs;
use crate::transport::{Closer, Connection};

/// Handle to a running session thread.
pub struct SessionWorker {
    /// Session id, carried on every event this session reports.
    id: u64,
    /// Remote device identity.
    peer: String,
    /// Output half; `None` once cancelled or after a failed write.
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    /// Closes the whole channel.
    closer: Arc<dyn Closer>,
    /// Set by [`cancel`](Self::cancel); silences the loss report.
    cancelled: Arc<AtomicBool>,
    /// Read loop thread.
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SessionWorker {
    /// Take ownership of `connection`, send the descriptor query and start
    /// the read loop.
    ///
    /// Events are reported on `events` tagged with `id`: at most one
    /// [`LinkEvent::Descriptor`], and one [`LinkEvent::ConnectionLost`] when
    /// the channel fails unless the session was cancelled first.
    pub fn spawn(id: u64, connection: Connection, events: Sender<LinkEvent>) -> LinkResult<Arc<SessionWorker>> {
        let Connection {
            peer,
            reader,
            writer,
            closer,
        } = connection;

        let worker = Arc::new(SessionWorker {
            id,
            peer: peer.clone(),
            writer: Mutex::new(Some(writer)),
            closer,
            cancelled: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        });

        match worker.write(&HostFrame::Query.encode()) {
            Ok(()) => counter!(metric_defs::FRAMES_SENT.name, "kind" => HostFrame::Query.kind()).increment(1),
            // The read loop will notice the broken channel too.
            Err(e) => warn!(session = id, error = %e, "failed to send descriptor query"),
        }

        let cancelled = worker.cancelled.clone();
        let spawned = thread::Builder::new()
            .name(format!("session-{}", id))
            .spawn(move || read_loop(id, &peer, reader, &cancelled, &events));
        match spawned {
            Ok(handle) => {
                *worker.thread.lock() = Some(handle);
                Ok(worker)
            }
            Err(e) => {
                worker.cancel();
                Err(LinkError::Io(e))
            }
        }
    }

    /// Session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote device identity.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write a complete frame.
    ///
    /// Returns [`LinkError::NotConnected`] without touching the channel when
    /// the output half is gone. A failed write retires the output half.
    pub fn write(&self, frame: &[u8]) -> LinkResult<()> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(LinkError::NotConnected)?;
        let result = writer.write_all(frame).and_then(|_| writer.flush());
        if let Err(e) = result {
            *guard = None;
            return Err(LinkError::Io(e));
        }
        Ok(())
    }

    /// Close the channel, ending the read loop without a loss report.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session = self.id, peer = %self.peer, "cancelling session");
        // Close first: it unblocks a write that may be holding the lock.
        self.closer.close();
        self.writer.lock().take();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check if the read loop has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.lock().as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the read loop to exit. Returns false if it panicked.
    pub fn join(&self) -> bool {
        let handle = self.thread.lock().take();
        match handle {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl std::fmt::Debug for SessionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWorker")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn read_loop(
    id: u64,
    peer: &str,
    reader: Box<dyn Read + Send>,
    cancelled: &AtomicBool,
    events: &Sender<LinkEvent>,
) {
    debug!(session = id, peer, "session read loop started");
    let mut codec = LineCodec::new();
    let mut descriptor_seen = false;

    let mut reason = "end of stream".to_string();
    for byte in BufReader::new(reader).bytes() {
        let byte = match byte {
            Ok(b) => b,
            Err(e) => {
                reason = e.to_string();
                break;
            }
        };
        let Some(descriptor) = codec.feed(byte) else {
            continue;
        };
        if descriptor_seen {
            debug!(session = id, %descriptor, "ignoring repeated descriptor");
            continue;
        }
        descriptor_seen = true;
        info!(session = id, %descriptor, "accessory described itself");
        let _ = events.send(LinkEvent::Descriptor {
            session: id,
            descriptor,
        });
    }

    if cancelled.load(Ordering::SeqCst) {
        debug!(session = id, "session read loop ended after cancel");
        return;
    }
    warn!(session = id, peer, reason = %reason, "accessory connection lost");
    let _ = events.send(LinkEvent::ConnectionLost { session: id, reason });
}

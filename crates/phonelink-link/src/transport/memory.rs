//! In-process transport built from crossbeam channels.
//!
//! [`MemoryTransport`] plays the host's listening endpoint and
//! [`MemoryDialer`] plays the accessory side: every
//! [`connect`](MemoryDialer::connect) queues a channel for the next `accept`
//! and returns the accessory's end as a [`MemoryPeer`].
//!
//! A channel behaves like a socket: closing either end fails pending and
//! future reads and writes on both ends, and dropping the peer shows up as
//! end-of-stream on the host.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use phonelink_protocol::{AccessoryDescriptor, HostFrame, LineCodec};

use super::{Closer, Connection, Listener, Transport};

/// One-shot close notification shared by everything attached to an endpoint.
///
/// Closing drops the only sender, which disconnects every receiver at once.
struct CloseSignal {
    trigger: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

impl CloseSignal {
    fn new() -> Arc<Self> {
        let (trigger, closed) = crossbeam_channel::bounded(0);
        Arc::new(CloseSignal {
            trigger: Mutex::new(Some(trigger)),
            closed,
        })
    }

    fn is_closed(&self) -> bool {
        matches!(self.closed.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl Closer for CloseSignal {
    fn close(&self) {
        self.trigger.lock().take();
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "channel closed")
}

/// Read half of an in-memory channel.
struct PipeReader {
    data: Receiver<Vec<u8>>,
    close: Arc<CloseSignal>,
    pending: Vec<u8>,
    pos: usize,
    timeout: Option<Duration>,
}

impl PipeReader {
    fn new(data: Receiver<Vec<u8>>, close: Arc<CloseSignal>) -> Self {
        PipeReader {
            data,
            close,
            pending: Vec::new(),
            pos: 0,
            timeout: None,
        }
    }

    /// Wait for the next chunk. `Ok(false)` means the writer is gone.
    fn refill(&mut self) -> io::Result<bool> {
        let next = match self.timeout {
            Some(timeout) => select! {
                recv(self.data) -> msg => msg,
                recv(self.close.closed) -> _ => return Err(closed_error()),
                default(timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
                }
            },
            None => select! {
                recv(self.data) -> msg => msg,
                recv(self.close.closed) -> _ => return Err(closed_error()),
            },
        };
        match next {
            Ok(chunk) => {
                self.pending = chunk;
                self.pos = 0;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.pending.len() {
            if self.close.is_closed() {
                return Err(closed_error());
            }
            if !self.refill()? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Write half of an in-memory channel.
struct PipeWriter {
    data: Sender<Vec<u8>>,
    close: Arc<CloseSignal>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.close.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        self.data
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Incoming {
    Channel(Connection),
    Fault(io::ErrorKind),
}

struct Hub {
    incoming_tx: Sender<Incoming>,
    incoming_rx: Receiver<Incoming>,
    refuse_listen: AtomicBool,
    listens: AtomicUsize,
    service_name: Mutex<Option<String>>,
}

/// Host side of the in-memory transport.
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

/// Accessory side of the in-memory transport.
#[derive(Clone)]
pub struct MemoryDialer {
    hub: Arc<Hub>,
}

impl MemoryTransport {
    /// Create a transport and the dialer that connects to it.
    pub fn new() -> (MemoryTransport, MemoryDialer) {
        let (incoming_tx, incoming_rx) = crossbeam_channel::unbounded();
        let hub = Arc::new(Hub {
            incoming_tx,
            incoming_rx,
            refuse_listen: AtomicBool::new(false),
            listens: AtomicUsize::new(0),
            service_name: Mutex::new(None),
        });
        (MemoryTransport { hub: hub.clone() }, MemoryDialer { hub })
    }

    /// Make subsequent [`listen`](Transport::listen) calls fail, as an
    /// unavailable radio would.
    pub fn refuse_listen(&self, refuse: bool) {
        self.hub.refuse_listen.store(refuse, Ordering::SeqCst);
    }

    /// Number of listening endpoints opened so far.
    pub fn listen_count(&self) -> usize {
        self.hub.listens.load(Ordering::SeqCst)
    }

    /// Service name of the most recent successful listen.
    pub fn service_name(&self) -> Option<String> {
        self.hub.service_name.lock().clone()
    }
}

impl Transport for MemoryTransport {
    fn listen(&self, service_name: &str) -> io::Result<Box<dyn Listener>> {
        if self.hub.refuse_listen.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "transport unavailable"));
        }
        self.hub.listens.fetch_add(1, Ordering::SeqCst);
        *self.hub.service_name.lock() = Some(service_name.to_string());
        Ok(Box::new(MemoryListener {
            incoming: self.hub.incoming_rx.clone(),
            close: CloseSignal::new(),
        }))
    }
}

struct MemoryListener {
    incoming: Receiver<Incoming>,
    close: Arc<CloseSignal>,
}

impl Listener for MemoryListener {
    fn accept(&mut self) -> io::Result<Connection> {
        if self.close.is_closed() {
            return Err(closed_error());
        }
        select! {
            recv(self.incoming) -> msg => match msg {
                Ok(Incoming::Channel(connection)) => Ok(connection),
                Ok(Incoming::Fault(kind)) => Err(io::Error::new(kind, "accept failed")),
                Err(_) => Err(closed_error()),
            },
            recv(self.close.closed) -> _ => Err(closed_error()),
        }
    }

    fn closer(&self) -> Arc<dyn Closer> {
        self.close.clone()
    }
}

impl MemoryDialer {
    /// Open a channel to the host, announcing ourselves as `peer`.
    pub fn connect(&self, peer: &str) -> MemoryPeer {
        let (host_tx, peer_rx) = crossbeam_channel::unbounded();
        let (peer_tx, host_rx) = crossbeam_channel::unbounded();
        let close = CloseSignal::new();

        let host_end = Connection {
            peer: peer.to_string(),
            reader: Box::new(PipeReader::new(host_rx, close.clone())),
            writer: Box::new(PipeWriter {
                data: host_tx,
                close: close.clone(),
            }),
            closer: close.clone(),
        };
        // The hub holds a receiver, so this cannot fail.
        let _ = self.hub.incoming_tx.send(Incoming::Channel(host_end));

        MemoryPeer {
            reader: PipeReader::new(peer_rx, close.clone()),
            writer: PipeWriter { data: peer_tx, close: close.clone() },
            close,
            codec: LineCodec::new(),
        }
    }

    /// Make the next pending `accept` fail with `kind`.
    pub fn fail_next_accept(&self, kind: io::ErrorKind) {
        let _ = self.hub.incoming_tx.send(Incoming::Fault(kind));
    }
}

/// The accessory's end of an in-memory channel.
///
/// Besides raw [`Read`]/[`Write`], it speaks the accessory half of the
/// protocol: reading host frames and answering with a descriptor.
pub struct MemoryPeer {
    reader: PipeReader,
    writer: PipeWriter,
    close: Arc<CloseSignal>,
    codec: LineCodec,
}

impl MemoryPeer {
    /// Read the next host frame, waiting at most `timeout` for each chunk.
    ///
    /// Lines that do not parse as host frames are skipped.
    pub fn read_frame(&mut self, timeout: Duration) -> io::Result<HostFrame> {
        self.reader.timeout = Some(timeout);
        let mut byte = [0u8; 1];
        let result = loop {
            match self.reader.read(&mut byte) {
                Ok(0) => break Err(io::Error::new(io::ErrorKind::UnexpectedEof, "host went away")),
                Ok(_) => {
                    if let Some(line) = self.codec.feed_line(byte[0]) {
                        if let Ok(frame) = HostFrame::parse(&line) {
                            break Ok(frame);
                        }
                    }
                }
                Err(e) => break Err(e),
            }
        };
        self.reader.timeout = None;
        result
    }

    /// Answer a query with `descriptor`.
    pub fn send_descriptor(&mut self, descriptor: &AccessoryDescriptor) -> io::Result<()> {
        let line = descriptor
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.writer.write_all(&line)
    }

    /// Close the channel, as if the radio link dropped.
    pub fn close(&self) {
        self.close.close();
    }

    /// Whether either end has closed the channel.
    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }
}

impl Read for MemoryPeer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for MemoryPeer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonelink_protocol::TelemetrySnapshot;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_connect_and_exchange() {
        let (transport, dialer) = MemoryTransport::new();
        let mut listener = transport.listen("dock-service").unwrap();
        let mut peer = dialer.connect("dock-01");

        let mut connection = listener.accept().unwrap();
        assert_eq!(connection.peer, "dock-01");

        connection.writer.write_all(&HostFrame::Query.encode()).unwrap();
        assert_eq!(peer.read_frame(TIMEOUT).unwrap(), HostFrame::Query);

        peer.write_all(b"ok\r").unwrap();
        let mut buf = [0u8; 3];
        connection.reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok\r");
    }

    #[test]
    fn test_read_frame_skips_noise() {
        let (transport, dialer) = MemoryTransport::new();
        let mut listener = transport.listen("dock-service").unwrap();
        let mut peer = dialer.connect("dock");
        let mut connection = listener.accept().unwrap();

        let status = HostFrame::Status(TelemetrySnapshot::new(1, 2, 87, false));
        connection.writer.write_all(b"garbage\r").unwrap();
        connection.writer.write_all(&status.encode()).unwrap();

        assert_eq!(peer.read_frame(TIMEOUT).unwrap(), status);
    }

    #[test]
    fn test_read_frame_times_out() {
        let (transport, dialer) = MemoryTransport::new();
        let _listener = transport.listen("dock-service").unwrap();
        let mut peer = dialer.connect("dock");

        let err = peer.read_frame(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_close_fails_both_ends() {
        let (transport, dialer) = MemoryTransport::new();
        let mut listener = transport.listen("dock-service").unwrap();
        let mut peer = dialer.connect("dock");
        let connection = listener.accept().unwrap();
        let mut reader = connection.reader;

        let waiter = thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(20));
        connection.closer.close();
        connection.closer.close();

        assert!(waiter.join().unwrap().is_err());
        assert!(peer.is_closed());
        assert!(peer.write_all(b"x").is_err());
    }

    #[test]
    fn test_dropped_peer_is_end_of_stream() {
        let (transport, dialer) = MemoryTransport::new();
        let mut listener = transport.listen("dock-service").unwrap();
        let peer = dialer.connect("dock");
        let mut connection = listener.accept().unwrap();

        drop(peer);
        let mut buf = [0u8; 1];
        assert_eq!(connection.reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_close_unblocks_accept() {
        let (transport, _dialer) = MemoryTransport::new();
        let mut listener = transport.listen("dock-service").unwrap();
        let closer = listener.closer();

        let waiter = thread::spawn(move || listener.accept().map(|_| ()));
        thread::sleep(Duration::from_millis(20));
        closer.close();

        assert!(waiter.join().unwrap().is_err());
    }

    #[test]
    fn test_injected_faults() {
        let (transport, dialer) = MemoryTransport::new();

        transport.refuse_listen(true);
        assert!(transport.listen("dock-service").is_err());
        transport.refuse_listen(false);

        let mut listener = transport.listen("dock-service").unwrap();
        dialer.fail_next_accept(io::ErrorKind::PermissionDenied);
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(transport.listen_count(), 1);
        assert_eq!(transport.service_name().as_deref(), Some("dock-service"));
    }
}

//! TCP transport.
//!
//! A blocking `accept` on a std `TcpListener` cannot be interrupted by
//! closing it from another thread, so the closer marks the listener closed
//! and then connects to it once to wake the accepting thread.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Closer, Connection, Listener, Transport};

/// How long the wake-up connection may take before giving up.
const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Listens for the accessory on a TCP address.
#[derive(Debug)]
pub struct TcpTransport {
    /// Address to bind, e.g. `127.0.0.1:7766`.
    addr: String,
    /// Address and service name of the most recent listening endpoint.
    bound: Mutex<Option<(SocketAddr, String)>>,
}

impl TcpTransport {
    /// Create a transport binding `addr` each time it listens.
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport {
            addr: addr.into(),
            bound: Mutex::new(None),
        }
    }

    /// The configured bind address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Address actually bound by the most recent [`listen`](Transport::listen).
    ///
    /// Differs from [`addr`](Self::addr) when binding port 0.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().as_ref().map(|(addr, _)| *addr)
    }

    /// Service name the most recent endpoint was opened for.
    pub fn service_name(&self) -> Option<String> {
        self.bound.lock().as_ref().map(|(_, name)| name.clone())
    }
}

impl Transport for TcpTransport {
    fn listen(&self, service_name: &str) -> io::Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(&self.addr)?;
        let local = listener.local_addr()?;
        *self.bound.lock() = Some((local, service_name.to_string()));
        debug!(addr = %local, service = service_name, "TCP listener bound");

        Ok(Box::new(TcpAcceptor {
            listener,
            closer: Arc::new(TcpListenerCloser {
                wake_addr: wake_addr(local),
                closed: AtomicBool::new(false),
            }),
        }))
    }
}

/// Address to connect to in order to reach a listener bound on `local`.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), local.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), local.port()),
        _ => local,
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    closer: Arc<TcpListenerCloser>,
}

impl Listener for TcpAcceptor {
    fn accept(&mut self) -> io::Result<Connection> {
        if self.closer.is_closed() {
            return Err(listener_closed());
        }
        let (stream, peer) = self.listener.accept()?;
        if self.closer.is_closed() {
            // Either the wake-up connection or a client racing the close.
            let _ = stream.shutdown(Shutdown::Both);
            return Err(listener_closed());
        }

        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "could not disable Nagle on accessory socket");
        }
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;

        Ok(Connection {
            peer: peer.to_string(),
            reader: Box::new(reader),
            writer: Box::new(stream),
            closer: Arc::new(TcpStreamCloser { stream: control }),
        })
    }

    fn closer(&self) -> Arc<dyn Closer> {
        self.closer.clone()
    }
}

fn listener_closed() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "listener closed")
}

struct TcpListenerCloser {
    wake_addr: SocketAddr,
    closed: AtomicBool,
}

impl TcpListenerCloser {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Closer for TcpListenerCloser {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the accepting thread; it sees the flag and bails out.
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, WAKE_TIMEOUT) {
            trace!(addr = %self.wake_addr, error = %e, "wake-up connection failed");
        }
    }
}

struct TcpStreamCloser {
    stream: TcpStream,
}

impl Closer for TcpStreamCloser {
    fn close(&self) {
        // A second shutdown reports NotConnected, which is fine.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

//! Listener Loop Implementation

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use anyhow::{bail, Context};
use mio::net::TcpListener;
use mio::Token;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::ConnectionSet;
use crate::poller::{MioPoller, Poller, Ready};
use crate::protocol::{headers_complete, host_name, http_response, reflection_page};
use crate::Result;

/// Poll token reserved for the listening socket.
const LISTENER: Token = Token(0);

/// What a single receive pass observed on a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveOutcome {
    /// The accumulated request ends with the header terminator.
    Complete,
    /// The peer shut down its side of the connection.
    PeerClosed,
    /// No terminator yet; more data may still arrive.
    Pending,
}

/// Single-threaded TCP listener loop.
///
/// Drives poll -> accept -> receive -> respond over one connection set.
/// Setup failures (bind, listen, accept, poll) are fatal and propagate;
/// per-connection receive failures are soft and leave the teardown to the
/// writable side of the cycle.
pub struct Listener<P: Poller = MioPoller> {
    config: Arc<Config>,
    poller: P,
    /// Bound but not yet listening socket, between `bind` and `listen`.
    bound: Option<Socket>,
    /// Listening socket, once `listen` has succeeded.
    socket: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    connections: ConnectionSet,
    ready: Vec<Ready>,
    /// Set when an accept was skipped at capacity; retried once a slot frees.
    accept_pending: bool,
    host_name: String,
    service: String,
}

impl Listener<MioPoller> {
    /// Create a listener backed by the mio readiness poller.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let poller = MioPoller::new().context("Failed to create readiness poller")?;
        Ok(Self::with_poller(config, poller))
    }
}

impl<P: Poller> Listener<P> {
    /// Create a listener on a specific readiness backend.
    pub fn with_poller(config: Arc<Config>, poller: P) -> Self {
        let max_connections = config.server.max_connections;
        Self {
            config,
            poller,
            bound: None,
            socket: None,
            local_addr: None,
            connections: ConnectionSet::new(max_connections),
            ready: Vec::new(),
            accept_pending: false,
            host_name: host_name(),
            service: String::new(),
        }
    }

    /// Address the listener is bound to, once `bind` has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of tracked peer connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether the listening socket is open.
    pub fn is_open(&self) -> bool {
        self.bound.is_some() || self.socket.is_some()
    }

    /// Resolve `address`/`service` and bind the first workable candidate.
    ///
    /// Each candidate socket is created with address reuse enabled before
    /// the bind attempt; the first successful bind wins. The socket does
    /// not listen until `listen` is called.
    pub fn bind(&mut self, address: &str, service: &str) -> Result<()> {
        self.service = service.to_string();

        let candidates = resolve(address, service)?;

        let mut partially_open: Option<Socket> = None;
        let mut bind_error: Option<io::Error> = None;
        let mut bound: Option<Socket> = None;

        for candidate in candidates {
            let socket =
                match Socket::new(Domain::for_address(candidate), Type::STREAM, Some(Protocol::TCP))
                {
                    Ok(socket) => socket,
                    Err(_) => continue,
                };

            // Best effort; the bind result decides whether the candidate is
            // usable.
            let _ = socket.set_reuse_address(true);

            match socket.bind(&SockAddr::from(candidate)) {
                Ok(()) => {
                    bound = Some(socket);
                    break;
                }
                Err(e) => {
                    bind_error = Some(e);
                    partially_open = Some(socket);
                }
            }
        }

        let socket = match bound {
            Some(socket) => socket,
            None => {
                // Clean up the partially-open socket before reporting.
                drop(partially_open);
                return match bind_error {
                    Some(e) => Err(e).with_context(|| {
                        format!("Failed to bind port/service '{}'", self.service)
                    }),
                    None => bail!("Failed to create socket for '{}:{}'", address, service),
                };
            }
        };

        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket());
        if let Some(addr) = local_addr {
            info!("listening to port {}", addr.port());
        }

        self.local_addr = local_addr;
        self.bound = Some(socket);
        Ok(())
    }

    /// Mark the bound socket as listening and register it with the poller.
    pub fn listen(&mut self, backlog: u32) -> Result<()> {
        let socket = self
            .bound
            .take()
            .context("listen called before a successful bind")?;

        if let Err(e) = socket.listen(backlog as i32) {
            // The socket is closed (dropped) before the error is reported.
            drop(socket);
            return Err(e)
                .with_context(|| format!("Failed to listen to port/service '{}'", self.service));
        }

        socket
            .set_nonblocking(true)
            .context("Failed to switch the listening socket to non-blocking mode")?;

        let mut listener = TcpListener::from_std(socket.into());
        self.poller
            .register_listener(&mut listener, LISTENER)
            .context("Failed to register the listening socket with the poller")?;

        self.socket = Some(listener);
        Ok(())
    }

    /// Run the accept/receive/respond cycle until the process is terminated.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.poll()? {
                continue;
            }
            self.dispatch()?;
        }
    }

    /// One readiness wait: evict closed connections, retry any deferred
    /// accept, then block until at least one tracked socket is ready.
    ///
    /// Returns whether the wait timed out, which can only happen when a
    /// poll timeout is configured.
    pub fn poll(&mut self) -> Result<bool> {
        let evicted = self.connections.evict_closed();
        if evicted > 0 {
            debug!("evicted {} closed connection(s)", evicted);
        }

        // Eviction may have freed a slot for an accept skipped at capacity.
        if self.accept_pending && !self.connections.at_capacity() {
            self.accept_ready()?;
        }

        debug!("polling {} connection(s)", self.connections.len() + 1);

        let timeout = self.config.server.poll_timeout;
        match self.poller.wait(&mut self.ready, timeout) {
            Ok(timed_out) => Ok(timed_out),
            Err(e) => {
                // Fatal by contract: close the listening socket, then report.
                self.close();
                Err(e).context("Failed to poll connections")
            }
        }
    }

    /// Serve every readiness event from the last poll.
    fn dispatch(&mut self) -> Result<()> {
        let ready = std::mem::take(&mut self.ready);

        for event in &ready {
            if event.token == LISTENER {
                self.accept_ready()?;
            } else {
                if event.readable {
                    self.receive(event.token);
                }
                if event.writable {
                    self.respond(event.token);
                }
            }
        }

        self.ready = ready;
        Ok(())
    }

    /// Drain pending accepts, up to the capacity ceiling.
    fn accept_ready(&mut self) -> Result<()> {
        self.accept_pending = false;

        loop {
            if self.connections.at_capacity() {
                // Admission policy: the peer stays in the OS backlog until a
                // slot frees; it is simply not serviced this cycle.
                debug!("connection ceiling reached, deferring accept");
                self.accept_pending = true;
                return Ok(());
            }

            if !self.accept_connection()? {
                return Ok(());
            }
        }
    }

    /// Accept exactly one pending peer, if any.
    ///
    /// Returns whether a peer was accepted.
    fn accept_connection(&mut self) -> Result<bool> {
        let listener = self
            .socket
            .as_ref()
            .context("accept attempted before listen")?;

        let (stream, peer_addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e).context("Failed to accept from client"),
        };

        let conn = self.connections.insert(stream, peer_addr);
        self.poller
            .register_stream(&mut conn.stream, conn.token)
            .context("Failed to register an accepted connection with the poller")?;

        info!(
            "new connection from {}:{} [{}]",
            peer_addr.ip(),
            peer_addr.port(),
            conn.token.0
        );
        Ok(true)
    }

    /// Read from a readable peer until the header terminator, the end of
    /// the stream, or the socket runs dry.
    ///
    /// Read errors are swallowed; the writable side of the cycle closes the
    /// connection either way.
    fn receive(&mut self, token: Token) -> ReceiveOutcome {
        let buffer_size = self.config.server.recv_buffer_size;
        let Some(conn) = self.connections.get_mut(token) else {
            return ReceiveOutcome::Pending;
        };
        if !conn.open {
            return ReceiveOutcome::Pending;
        }

        let mut buffer = vec![0u8; buffer_size];
        let outcome = loop {
            match conn.stream.read(&mut buffer) {
                Ok(0) => break ReceiveOutcome::PeerClosed,
                Ok(n) => {
                    conn.request.extend_from_slice(&buffer[..n]);
                    if headers_complete(&conn.request) {
                        // Bodies past the terminator are never consumed.
                        break ReceiveOutcome::Complete;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break ReceiveOutcome::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("failed to receive data from [{}]: {}", token.0, e);
                    break ReceiveOutcome::Pending;
                }
            }
        };

        if outcome != ReceiveOutcome::Pending {
            let request = if conn.request.is_empty() {
                "(nothing)".to_string()
            } else {
                String::from_utf8_lossy(&conn.request).into_owned()
            };
            debug!("received from [{}]\n{}", token.0, request);
        }

        outcome
    }

    /// Write the reflection page to a writable peer, then close it.
    fn respond(&mut self, token: Token) {
        let host_name = self.host_name.clone();
        let Some(conn) = self.connections.get_mut(token) else {
            return;
        };
        if !conn.open {
            return;
        }

        let body = reflection_page(conn.peer_addr, &host_name);
        let response = http_response(&body);

        debug!("writing response to [{}]", token.0);

        // One send, no partial-write retry.
        if let Err(e) = conn.stream.write(response.as_bytes()) {
            debug!("failed to write response to [{}]: {}", token.0, e);
        }

        self.close_connection(token);
    }

    /// Shut down and release a peer connection.
    ///
    /// The socket itself is dropped by the next cycle's eviction pass.
    fn close_connection(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(token) else {
            return;
        };

        match conn.stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            // A peer that already went away is not an error.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => warn!("Failed to shutdown connection [{}]: {}", token.0, e),
        }

        if let Err(e) = self.poller.deregister_stream(&mut conn.stream) {
            debug!("failed to deregister connection [{}]: {}", token.0, e);
        }

        conn.open = false;
    }

    /// Close the listening socket.
    pub fn close(&mut self) {
        self.bound = None;
        if self.socket.take().is_some() {
            debug!("listening socket closed");
        }
    }
}

/// Resolve an address/service pair to candidate endpoints.
///
/// The service must be a numeric port; std offers no getaddrinfo-style
/// service-name lookup.
fn resolve(address: &str, service: &str) -> Result<Vec<SocketAddr>> {
    let port: u16 = service.parse().with_context(|| {
        format!(
            "Failed to get information about the specified network port/service '{}'",
            service
        )
    })?;

    let candidates: Vec<SocketAddr> = (address, port)
        .to_socket_addrs()
        .with_context(|| {
            format!(
                "Failed to get information about the specified network port/service '{}'",
                service
            )
        })?
        .collect();

    if candidates.is_empty() {
        bail!(
            "Failed to get information about the specified network port/service '{}'",
            service
        );
    }

    Ok(candidates)
}

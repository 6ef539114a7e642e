//! Readiness Polling
//!
//! The listener loop waits for I/O through one pluggable "wait for
//! readiness" capability. The production backend multiplexes over
//! `mio::Poll`, which fans epoll/kqueue/IOCP into a single readiness
//! interface, so poll-style and event-object fan-in meet behind the same
//! trait.

use std::io;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

/// A readiness event delivered by a poller backend.
#[derive(Debug, Clone, Copy)]
pub struct Ready {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

/// Blocks until at least one registered socket is ready for I/O.
pub trait Poller {
    /// Register the listening socket with readable interest.
    fn register_listener(&mut self, listener: &mut TcpListener, token: Token) -> io::Result<()>;

    /// Register a peer stream with readable and writable interest.
    fn register_stream(&mut self, stream: &mut TcpStream, token: Token) -> io::Result<()>;

    /// Remove a peer stream from the readiness set.
    fn deregister_stream(&mut self, stream: &mut TcpStream) -> io::Result<()>;

    /// Wait for readiness, filling `ready` with the sockets that became
    /// ready. Returns whether the wait timed out before any did.
    fn wait(&mut self, ready: &mut Vec<Ready>, timeout: Option<Duration>) -> io::Result<bool>;
}

/// Readiness backend over `mio::Poll`.
pub struct MioPoller {
    poll: Poll,
    events: Events,
}

impl MioPoller {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
        })
    }
}

impl Poller for MioPoller {
    fn register_listener(&mut self, listener: &mut TcpListener, token: Token) -> io::Result<()> {
        self.poll
            .registry()
            .register(listener, token, Interest::READABLE)
    }

    fn register_stream(&mut self, stream: &mut TcpStream, token: Token) -> io::Result<()> {
        self.poll
            .registry()
            .register(stream, token, Interest::READABLE | Interest::WRITABLE)
    }

    fn deregister_stream(&mut self, stream: &mut TcpStream) -> io::Result<()> {
        self.poll.registry().deregister(stream)
    }

    fn wait(&mut self, ready: &mut Vec<Ready>, timeout: Option<Duration>) -> io::Result<bool> {
        ready.clear();

        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        for event in self.events.iter() {
            ready.push(Ready {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
            });
        }

        Ok(ready.is_empty() && timeout.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};

    const LISTENER: Token = Token(0);

    fn bound_listener() -> TcpListener {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        TcpListener::from_std(listener)
    }

    #[test]
    fn test_listener_becomes_readable_on_connect() {
        let mut poller = MioPoller::new().expect("poller");
        let mut listener = bound_listener();
        poller
            .register_listener(&mut listener, LISTENER)
            .expect("register");

        let addr = listener.local_addr().expect("local addr");
        let _client = StdTcpStream::connect(addr).expect("connect");

        let mut ready = Vec::new();
        let mut saw_listener = false;
        for _ in 0..50 {
            let timed_out = poller
                .wait(&mut ready, Some(Duration::from_millis(100)))
                .expect("wait");
            if !timed_out && ready.iter().any(|r| r.token == LISTENER && r.readable) {
                saw_listener = true;
                break;
            }
        }

        assert!(saw_listener, "listener never reported readable");
    }

    #[test]
    fn test_wait_times_out_when_nothing_is_ready() {
        let mut poller = MioPoller::new().expect("poller");
        let mut listener = bound_listener();
        poller
            .register_listener(&mut listener, LISTENER)
            .expect("register");

        let mut ready = Vec::new();
        let timed_out = poller
            .wait(&mut ready, Some(Duration::from_millis(20)))
            .expect("wait");

        assert!(timed_out);
        assert!(ready.is_empty());
    }

    #[test]
    fn test_stream_reports_writable_after_registration() {
        let mut poller = MioPoller::new().expect("poller");
        let mut listener = bound_listener();
        poller
            .register_listener(&mut listener, LISTENER)
            .expect("register");

        let addr = listener.local_addr().expect("local addr");
        let _client = StdTcpStream::connect(addr).expect("connect");

        // Accept the peer once the listener reports readable.
        let mut ready = Vec::new();
        let mut accepted = None;
        for _ in 0..50 {
            poller
                .wait(&mut ready, Some(Duration::from_millis(100)))
                .expect("wait");
            if let Ok((stream, _)) = listener.accept() {
                accepted = Some(stream);
                break;
            }
        }
        let mut stream = accepted.expect("accept");

        let token = Token(1);
        poller.register_stream(&mut stream, token).expect("register");

        let mut saw_writable = false;
        for _ in 0..50 {
            poller
                .wait(&mut ready, Some(Duration::from_millis(100)))
                .expect("wait");
            if ready.iter().any(|r| r.token == token && r.writable) {
                saw_writable = true;
                break;
            }
        }

        assert!(saw_writable, "fresh connection never reported writable");
        poller.deregister_stream(&mut stream).expect("deregister");
    }
}

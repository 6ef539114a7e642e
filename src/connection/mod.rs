//! Connection Tracking
//!
//! An accepted peer socket and the ordered, capacity-bounded collection the
//! listener loop polls over.

use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::Token;

/// An accepted peer connection.
pub struct Connection {
    /// The peer socket, registered with the readiness poller.
    pub stream: TcpStream,
    /// Poll token identifying this connection.
    pub token: Token,
    /// Peer address captured at accept time.
    pub peer_addr: SocketAddr,
    /// Request bytes accumulated across readiness events.
    pub request: Vec<u8>,
    /// Cleared once the response has been written and the socket shut down.
    pub open: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, token: Token, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            token,
            peer_addr,
            request: Vec::new(),
            open: true,
        }
    }
}

/// Ordered collection of peer connections, bounded by a capacity ceiling.
///
/// Closed connections stay in the set until the next cycle's eviction pass,
/// so the invariant "no closed connection is polled" is re-established at
/// the top of every cycle rather than maintained incrementally.
pub struct ConnectionSet {
    connections: Vec<Connection>,
    capacity: usize,
    next_token: usize,
}

impl ConnectionSet {
    /// Create an empty set admitting at most `capacity` peers.
    ///
    /// Tokens start at 1; token 0 belongs to the listening socket.
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: Vec::with_capacity(capacity),
            capacity,
            next_token: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether the set has reached its capacity ceiling.
    pub fn at_capacity(&self) -> bool {
        self.connections.len() >= self.capacity
    }

    /// Admit a freshly accepted peer, assigning it the next token.
    pub fn insert(&mut self, stream: TcpStream, peer_addr: SocketAddr) -> &mut Connection {
        let token = Token(self.next_token);
        self.next_token += 1;

        let index = self.connections.len();
        self.connections.push(Connection::new(stream, token, peer_addr));
        &mut self.connections[index]
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|conn| conn.token == token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Drop every closed connection, releasing its socket.
    ///
    /// Returns how many connections were evicted.
    pub fn evict_closed(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|conn| conn.open);
        before - self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};

    /// An accepted (server-side) stream plus the client half keeping it alive.
    fn accepted_stream(listener: &StdTcpListener) -> (TcpStream, StdTcpStream) {
        let addr = listener.local_addr().expect("local addr");
        let client = StdTcpStream::connect(addr).expect("connect");
        let (server, _) = listener.accept().expect("accept");
        server.set_nonblocking(true).expect("nonblocking");
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn test_insert_assigns_unique_tokens() {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
        let mut set = ConnectionSet::new(4);
        let mut clients = Vec::new();

        for _ in 0..3 {
            let (stream, client) = accepted_stream(&listener);
            let peer_addr = client.local_addr().expect("client addr");
            set.insert(stream, peer_addr);
            clients.push(client);
        }

        let mut tokens: Vec<usize> = set.iter().map(|conn| conn.token.0).collect();
        assert_eq!(tokens.len(), 3);
        tokens.dedup();
        assert_eq!(tokens, vec![1, 2, 3]);
    }

    #[test]
    fn test_each_connection_appears_exactly_once() {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
        let mut set = ConnectionSet::new(8);

        let (stream, client) = accepted_stream(&listener);
        let peer_addr = client.local_addr().expect("client addr");
        let token = set.insert(stream, peer_addr).token;

        let matching = set.iter().filter(|conn| conn.token == token).count();
        assert_eq!(matching, 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_at_capacity() {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
        let mut set = ConnectionSet::new(2);
        let mut clients = Vec::new();

        assert!(!set.at_capacity());

        for _ in 0..2 {
            let (stream, client) = accepted_stream(&listener);
            let peer_addr = client.local_addr().expect("client addr");
            set.insert(stream, peer_addr);
            clients.push(client);
        }

        assert!(set.at_capacity());
    }

    #[test]
    fn test_evict_closed_drops_only_closed_connections() {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
        let mut set = ConnectionSet::new(4);
        let mut clients = Vec::new();

        let mut tokens = Vec::new();
        for _ in 0..3 {
            let (stream, client) = accepted_stream(&listener);
            let peer_addr = client.local_addr().expect("client addr");
            tokens.push(set.insert(stream, peer_addr).token);
            clients.push(client);
        }

        set.get_mut(tokens[1]).expect("tracked").open = false;

        assert_eq!(set.evict_closed(), 1);
        assert_eq!(set.len(), 2);
        assert!(set.get_mut(tokens[1]).is_none());
        assert!(set.iter().all(|conn| conn.open));

        // Nothing left to evict.
        assert_eq!(set.evict_closed(), 0);
    }

    #[test]
    fn test_tokens_are_not_reused_after_eviction() {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
        let mut set = ConnectionSet::new(4);

        let (stream, client) = accepted_stream(&listener);
        let peer_addr = client.local_addr().expect("client addr");
        let first = set.insert(stream, peer_addr).token;
        set.get_mut(first).expect("tracked").open = false;
        set.evict_closed();
        drop(client);

        let (stream, client) = accepted_stream(&listener);
        let peer_addr = client.local_addr().expect("client addr");
        let second = set.insert(stream, peer_addr).token;
        drop(client);

        assert_ne!(first, second);
    }
}

//! Policy Connection Handler
//!
//! This module handles individual client connections to the policy server.
//! Each accepted client gets its own task that performs exactly one
//! request/response exchange and then closes the connection.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. PolicyConnection spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────────┐
//!    │  Read up to 1024 bytes           │──── timeout ────┐
//!    │  (bounded by socket_timeout)     │──── I/O error ──┤
//!    └───────────────┬──────────────────┘                 │
//!                    │                                    │
//!                    ▼                                    │
//!    ┌──────────────────────────────────┐                 │
//!    │  Exactly <policy-file-request/>\0 ?                │
//!    └───────┬──────────────────┬───────┘                 │
//!            │ yes              │ no                      │
//!            ▼                  │                         │
//!    ┌────────────────┐         │                         │
//!    │ Write policy   │         │                         │
//!    └───────┬────────┘         │                         │
//!            │                  │                         │
//!            ▼                  ▼                         ▼
//! 4. ┌────────────────────────────────────────────────────────┐
//!    │          Close the connection (always)                 │
//!    └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Containment
//!
//! Every failure is local to its connection: it is logged, counted in
//! [`ConnectionStats`], and the connection is closed. Nothing is retried and
//! nothing is reported to the client.

use crate::policy::{is_policy_request, PolicyDocument};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Size of the single read performed on each connection
pub const READ_BUFFER_SIZE: usize = 1024;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Connections that received the policy document
    pub policies_served: AtomicU64,
    /// Connections closed because the request did not match
    pub requests_rejected: AtomicU64,
    /// Connections closed because no request arrived in time
    pub read_timeouts: AtomicU64,
    /// Connections that failed with a read or write error, or a stalled write
    pub connection_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn policy_served(&self) {
        self.policies_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_timed_out(&self) {
        self.read_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// How a completed exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request matched and the policy document was written
    PolicySent { bytes: usize },

    /// The request did not match; nothing was written
    Rejected { received: usize },
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No data arrived within the socket timeout
    #[error("no policy request received within {0:?}")]
    ReadTimeout(Duration),

    /// Reading the request failed
    #[error("failed to read policy request: {0}")]
    Read(#[source] std::io::Error),

    /// Writing the policy document failed
    #[error("failed to write policy document: {0}")]
    Write(#[source] std::io::Error),

    /// The client stopped reading before the policy was written
    #[error("policy document not written within {0:?}")]
    WriteTimeout(Duration),
}

/// Handles a single policy request connection.
///
/// Generic over the transport so it can run on a `TcpStream` in production
/// and on an in-memory mock in tests.
pub struct PolicyConnection<S> {
    /// The client transport
    stream: S,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// The policy document (shared across connections)
    policy: PolicyDocument,

    /// Upper bound on the wait for the request, and on the reply write
    read_timeout: Duration,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> PolicyConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The accepted client transport
    /// * `addr` - The client's socket address
    /// * `policy` - The document to send on a valid request
    /// * `read_timeout` - How long to wait for the request (and the write)
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: S,
        addr: SocketAddr,
        policy: PolicyDocument,
        read_timeout: Duration,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream,
            addr,
            policy,
            read_timeout,
            stats,
        }
    }

    /// Runs the exchange to completion and closes the connection.
    ///
    /// The connection is closed on every path, including read timeouts,
    /// I/O errors and rejected requests.
    pub async fn run(mut self) -> Result<Outcome, ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = self.exchange().await;
        self.close().await;

        match &result {
            Ok(Outcome::PolicySent { bytes }) => {
                self.stats.policy_served();
                debug!(client = %self.addr, bytes = bytes, "Policy sent");
            }
            Ok(Outcome::Rejected { received }) => {
                self.stats.request_rejected();
                debug!(
                    client = %self.addr,
                    received = received,
                    "Not a policy request, closing without reply"
                );
            }
            Err(e @ ConnectionError::ReadTimeout(_)) => {
                self.stats.read_timed_out();
                warn!(client = %self.addr, error = %e, "Read timed out");
            }
            Err(ConnectionError::Read(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                self.stats.connection_failed();
                debug!(client = %self.addr, "Connection reset by client");
            }
            Err(e) => {
                self.stats.connection_failed();
                warn!(client = %self.addr, error = %e, "Connection error");
            }
        }

        self.stats.connection_closed();
        result
    }

    /// Reads the request and answers it if it matches.
    async fn exchange(&mut self) -> Result<Outcome, ConnectionError> {
        let request = self.read_request().await?;

        if !is_policy_request(&request) {
            return Ok(Outcome::Rejected {
                received: request.len(),
            });
        }

        self.send_policy().await
    }

    /// Performs the single bounded read.
    async fn read_request(&mut self) -> Result<BytesMut, ConnectionError> {
        let mut buffer = BytesMut::zeroed(READ_BUFFER_SIZE);

        let n = match tokio::time::timeout(self.read_timeout, self.stream.read(&mut buffer)).await
        {
            Ok(read) => read.map_err(ConnectionError::Read)?,
            Err(_elapsed) => return Err(ConnectionError::ReadTimeout(self.read_timeout)),
        };

        buffer.truncate(n);
        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read request");

        Ok(buffer)
    }

    /// Writes the policy document in one go.
    ///
    /// Bounded by the same timeout as the read, so a client that sends the
    /// request and never drains a large document cannot pin the task.
    async fn send_policy(&mut self) -> Result<Outcome, ConnectionError> {
        let bytes = self.policy.as_bytes();
        match tokio::time::timeout(self.read_timeout, self.stream.write_all(bytes)).await {
            Ok(written) => written.map_err(ConnectionError::Write)?,
            Err(_elapsed) => return Err(ConnectionError::WriteTimeout(self.read_timeout)),
        }
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Wrote policy");

        Ok(Outcome::PolicySent { bytes: bytes.len() })
    }

    /// Shuts the transport down. Failures are logged, never propagated.
    async fn close(&mut self) {
        match self.stream.shutdown().await {
            Ok(()) => trace!(client = %self.addr, "Closed client connection"),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {
                debug!(client = %self.addr, "Client already disconnected")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Error while closing connection"),
        }
    }
}

/// Handles a client connection.
///
/// This is the entry point spawned for every accepted connection. A `None`
/// stream is ignored. The outcome is already logged and counted by
/// [`PolicyConnection::run`], so errors only get a trace line here.
///
/// # Arguments
///
/// * `stream` - The accepted transport, if any
/// * `addr` - The client's socket address
/// * `policy` - The document to send on a valid request
/// * `read_timeout` - How long to wait for the request
/// * `stats` - Shared connection statistics
pub async fn handle_connection<S>(
    stream: Option<S>,
    addr: SocketAddr,
    policy: PolicyDocument,
    read_timeout: Duration,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(stream) = stream else {
        return;
    };

    let connection = PolicyConnection::new(stream, addr, policy, read_timeout, stats);
    if let Err(e) = connection.run().await {
        // run() already logged this at the appropriate level
        trace!(client = %addr, error = %e, "Connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DEFAULT_POLICY, EXPECTED_REQUEST};
    use std::io;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn client_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    async fn run_mock(
        mock: tokio_test::io::Mock,
        stats: &Arc<ConnectionStats>,
    ) -> Result<Outcome, ConnectionError> {
        PolicyConnection::new(
            mock,
            client_addr(),
            PolicyDocument::default(),
            Duration::from_secs(5),
            Arc::clone(stats),
        )
        .run()
        .await
    }

    #[tokio::test]
    async fn test_valid_request_gets_policy() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new()
            .read(EXPECTED_REQUEST)
            .write(DEFAULT_POLICY)
            .build();

        let outcome = run_mock(mock, &stats).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::PolicySent {
                bytes: DEFAULT_POLICY.len()
            }
        );
        assert_eq!(stats.policies_served.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 23);
        assert_eq!(
            stats.bytes_written.load(Ordering::Relaxed),
            DEFAULT_POLICY.len() as u64
        );
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_configured_policy_is_sent() {
        let stats = Arc::new(ConnectionStats::new());
        let policy = PolicyDocument::from_bytes("<policy></policy>");
        let mock = Builder::new()
            .read(EXPECTED_REQUEST)
            .write(b"<policy></policy>\0")
            .build();

        let outcome = PolicyConnection::new(
            mock,
            client_addr(),
            policy,
            Duration::from_secs(5),
            Arc::clone(&stats),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::PolicySent { bytes: 18 });
    }

    #[tokio::test]
    async fn test_short_request_rejected() {
        // The mock panics on any unexpected write
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new().read(b"<policy-file-request/>").build();

        let outcome = run_mock(mock, &stats).await.unwrap();

        assert_eq!(outcome, Outcome::Rejected { received: 22 });
        assert_eq!(stats.requests_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_padded_request_rejected() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new()
            .read(b"<policy-file-request/>\0<policy-file-request/>\0")
            .build();

        let outcome = run_mock(mock, &stats).await.unwrap();

        assert_eq!(outcome, Outcome::Rejected { received: 46 });
    }

    #[tokio::test]
    async fn test_wrong_request_same_length_rejected() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new().read(b"GET /crossdomain.xml\r\n\0").build();

        let outcome = run_mock(mock, &stats).await.unwrap();

        assert_eq!(outcome, Outcome::Rejected { received: 23 });
    }

    #[tokio::test]
    async fn test_immediate_eof_rejected() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new().build();

        let outcome = run_mock(mock, &stats).await.unwrap();

        assert_eq!(outcome, Outcome::Rejected { received: 0 });
    }

    #[tokio::test]
    async fn test_read_error() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let err = run_mock(mock, &stats).await.unwrap_err();

        assert!(matches!(err, ConnectionError::Read(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
        assert_eq!(stats.connection_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_write_error() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new()
            .read(EXPECTED_REQUEST)
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
            .build();

        let err = run_mock(mock, &stats).await.unwrap_err();

        assert!(matches!(err, ConnectionError::Write(_)));
        assert_eq!(stats.policies_served.load(Ordering::Relaxed), 0);
        assert_eq!(stats.connection_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_none_stream_is_noop() {
        let stats = Arc::new(ConnectionStats::new());

        handle_connection::<TcpStream>(
            None,
            client_addr(),
            PolicyDocument::default(),
            Duration::from_secs(1),
            Arc::clone(&stats),
        )
        .await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 0);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();

        let err = PolicyConnection::new(
            server_side,
            peer,
            PolicyDocument::default(),
            Duration::from_millis(100),
            Arc::clone(&stats),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, ConnectionError::ReadTimeout(_)));
        assert_eq!(stats.read_timeouts.load(Ordering::Relaxed), 1);

        // Closed without a reply
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_tcp_exchange_closes_after_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        let stats_clone = Arc::clone(&stats);
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(
                Some(stream),
                peer,
                PolicyDocument::default(),
                Duration::from_secs(5),
                stats_clone,
            )
            .await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(EXPECTED_REQUEST).await.unwrap();

        // read_to_end only returns once the server has closed
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, DEFAULT_POLICY);

        server.await.unwrap();
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.policies_served.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_stalled_reader_write_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        // Far larger than any socket send buffer
        let policy = PolicyDocument::from_bytes(vec![b'x'; 32 * 1024 * 1024]);

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();

        // Send the request, then never read
        client.write_all(EXPECTED_REQUEST).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            PolicyConnection::new(
                server_side,
                peer,
                policy,
                Duration::from_millis(300),
                Arc::clone(&stats),
            )
            .run(),
        )
        .await
        .expect("write to a stalled reader was not bounded");

        assert!(matches!(result, Err(ConnectionError::WriteTimeout(_))));
        assert_eq!(stats.policies_served.load(Ordering::Relaxed), 0);
        assert_eq!(stats.connection_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        drop(client);
    }

    #[tokio::test]
    async fn test_handle_connection_contains_errors() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::Other, "interrupted"))
            .build();

        handle_connection(
            Some(mock),
            client_addr(),
            PolicyDocument::default(),
            Duration::from_secs(1),
            Arc::clone(&stats),
        )
        .await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.connection_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}

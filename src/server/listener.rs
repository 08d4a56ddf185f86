//! Policy Server Listener
//!
//! Owns the listening socket and the accept loop, and exposes the lifecycle
//! calls an embedding host drives: `init`, `start`, `pause`, `resume`,
//! `stop` and `destroy`.
//!
//! ## State Machine
//!
//! ```text
//!  ┌─────────┐  start()   ┌───────────┐  stop()   ┌──────────────┐  loop exits  ┌────────┐
//!  │ Created │ ─────────> │ Accepting │ ────────> │ ShuttingDown │ ───────────> │ Closed │
//!  └────┬────┘            └─────┬─────┘           └──────────────┘              └────────┘
//!       │                       │ accept / re-arm                                    ▲
//!       │                       └──────┐                                             │
//!       │                              ▼                                             │
//!       │                        (spawn handler)                                     │
//!       └───────────────────────────── stop() before start() ────────────────────────┘
//! ```
//!
//! A failed bind leaves the server in `Created`.
//!
//! ## Shutdown Discipline
//!
//! The shutdown flag and the listener state live behind one mutex, so a
//! `stop()` racing a `start()` can never leave an accept loop running on a
//! server that was told to stop. The accept loop itself watches a
//! `tokio::sync::watch` channel and checks the flag after every accept, so
//! it never re-arms once shutdown has been requested. Dropping the
//! `TcpListener` at the end of the loop is what closes the socket.

use crate::config::ServerConfig;
use crate::connection::{handle_connection, ConnectionStats};
use crate::policy::PolicyDocument;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Lifecycle phase of a [`PolicyServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, not yet listening
    Created,
    /// Bound and accepting connections
    Accepting,
    /// Shutdown requested, accept loop winding down
    ShuttingDown,
    /// Listening socket closed; terminal
    Closed,
}

/// Errors returned by [`PolicyServer::start`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be created or bound
    #[error("unable to bind policy listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// `start()` was called on a server that is already accepting
    #[error("policy server is already accepting connections")]
    AlreadyStarted,

    /// `start()` was called after shutdown was requested
    #[error("policy server has been shut down")]
    ShutDown,
}

/// Mutable listener state, only touched with the lock held.
#[derive(Debug)]
struct ListenerState {
    phase: Phase,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
}

/// State shared between the server handle and its accept loop.
#[derive(Debug)]
struct Shared {
    /// Set once, never cleared
    shutdown: AtomicBool,
    state: Mutex<ListenerState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            state: Mutex::new(ListenerState {
                phase: Phase::Created,
                local_addr: None,
                shutdown_tx: None,
                accept_task: None,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        let mut state = self.lock_state();
        state.phase = Phase::Closed;
        state.local_addr = None;
    }
}

/// A Flash socket policy server.
///
/// # Example
///
/// ```ignore
/// use flashpolicy::{PolicyServer, ServerConfig};
///
/// let mut server = PolicyServer::new(ServerConfig::default());
/// server.init();
/// let addr = server.start().await?;
///
/// // ... serve until asked to stop ...
///
/// server.stop();
/// server.closed().await;
/// ```
#[derive(Debug)]
pub struct PolicyServer {
    config: ServerConfig,
    policy: PolicyDocument,
    stats: Arc<ConnectionStats>,
    shared: Arc<Shared>,
}

impl PolicyServer {
    /// Creates a server in the `Created` phase, serving the built-in
    /// policy until [`init`](Self::init) is called.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            policy: PolicyDocument::default(),
            stats: Arc::new(ConnectionStats::new()),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Loads the policy document.
    ///
    /// Never fails: an unreadable policy file is logged and the built-in
    /// document is kept.
    pub fn init(&mut self) {
        info!(
            port = self.config.port,
            "Initializing Flash socket policy server"
        );
        self.policy = PolicyDocument::load_or_default(self.config.policy_file.as_deref());
    }

    /// Binds the listening socket and starts the accept loop.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        {
            let state = self.shared.lock_state();
            match state.phase {
                Phase::Created => {}
                Phase::Accepting => return Err(ServerError::AlreadyStarted),
                Phase::ShuttingDown | Phase::Closed => return Err(ServerError::ShutDown),
            }
        }

        let bind_address = self.config.bind_address();
        let listener = match TcpListener::bind(&bind_address).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(address = %bind_address, error = %source, "Unable to create server socket");
                return Err(ServerError::Bind {
                    addr: bind_address,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_address,
            source,
        })?;

        let mut state = self.shared.lock_state();

        // stop() or a concurrent start() may have won while we were binding;
        // returning drops (closes) the fresh listener
        if self.shared.is_shutdown_requested() {
            return Err(ServerError::ShutDown);
        }
        if state.phase != Phase::Created {
            return Err(ServerError::AlreadyStarted);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context = AcceptContext {
            policy: self.policy.clone(),
            read_timeout: self.config.socket_timeout,
            stats: Arc::clone(&self.stats),
            shared: Arc::clone(&self.shared),
        };
        let accept_task = tokio::spawn(accept_loop(listener, context, shutdown_rx));

        state.phase = Phase::Accepting;
        state.local_addr = Some(local_addr);
        state.shutdown_tx = Some(shutdown_tx);
        state.accept_task = Some(accept_task);

        info!(
            address = %local_addr,
            timeout_secs = self.config.socket_timeout.as_secs(),
            "Policy server listening"
        );
        Ok(local_addr)
    }

    /// Accepted for host compatibility; the server keeps accepting.
    pub fn pause(&self) {
        debug!("Pause requested, policy server keeps accepting");
    }

    /// Accepted for host compatibility; the server keeps accepting.
    pub fn resume(&self) {
        debug!("Resume requested, policy server keeps accepting");
    }

    /// Requests shutdown of the listening socket.
    ///
    /// Idempotent. Connections already being served run to completion.
    ///
    /// This only signals the accept loop; the socket is closed once that
    /// task next runs and drops its listener, which may be after `stop()`
    /// returns. Use [`shutdown`](Self::shutdown) to wait for the close.
    pub fn stop(&self) {
        let mut state = self.shared.lock_state();

        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            trace!("Shutdown already requested");
            return;
        }

        match state.shutdown_tx.take() {
            Some(shutdown_tx) => {
                state.phase = Phase::ShuttingDown;
                let _ = shutdown_tx.send(true);
                info!("Shutdown requested, closing policy listener");
            }
            None => {
                state.phase = Phase::Closed;
                info!("Shutdown requested before the policy listener was started");
            }
        }
    }

    /// Same as [`stop`](Self::stop).
    pub fn destroy(&self) {
        self.stop();
    }

    /// Stops the server and waits until the listening socket is closed.
    ///
    /// When this returns the port can be bound again.
    pub async fn shutdown(&self) {
        self.stop();
        self.closed().await;
    }

    /// Waits for the accept loop to exit after [`stop`](Self::stop).
    ///
    /// Once this returns the listening socket is closed. Only the first
    /// caller actually waits; later calls return immediately.
    pub async fn closed(&self) {
        let accept_task = self.shared.lock_state().accept_task.take();

        if let Some(accept_task) = accept_task {
            if let Err(e) = accept_task.await {
                error!(error = %e, "Accept loop terminated abnormally");
                self.shared.mark_closed();
            }
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.shared.lock_state().phase
    }

    /// The bound address while accepting.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.lock_state().local_addr
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.is_shutdown_requested()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The document served to valid requests.
    pub fn policy(&self) -> &PolicyDocument {
        &self.policy
    }

    /// Shared connection statistics.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for PolicyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A source of accepted connections for the accept loop.
trait Acceptor: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Everything a spawned connection needs, cloned out of the server.
struct AcceptContext {
    policy: PolicyDocument,
    read_timeout: Duration,
    stats: Arc<ConnectionStats>,
    shared: Arc<Shared>,
}

/// Accepts connections until shutdown, spawning one task per connection.
async fn accept_loop<L: Acceptor>(
    listener: L,
    context: AcceptContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!("Accept loop received shutdown signal");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        trace!(client = %addr, "New connection accepted");

                        tokio::spawn(handle_connection(
                            Some(stream),
                            addr,
                            context.policy.clone(),
                            context.read_timeout,
                            Arc::clone(&context.stats),
                        ));

                        if context.shared.is_shutdown_requested() {
                            break;
                        }
                    }
                    Err(e) => {
                        if context.shared.is_shutdown_requested() {
                            debug!(error = %e, "Accept interrupted by shutdown");
                            break;
                        }
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }

    drop(listener);
    context.shared.mark_closed();
    info!("Policy listener closed");
}

//! # FlashPolicy - An Async Flash Socket Policy Server
//!
//! FlashPolicy answers the Flash/Flex cross-domain socket policy handshake.
//! Before a Flash or Flex client may open a raw socket to a host, it connects
//! to the host's policy port (843 by default), sends
//! `<policy-file-request/>\0`, and expects a `<cross-domain-policy>` XML
//! document back. This crate serves that document.
//!
//! ## Features
//!
//! - **Exact Matching**: Only the exact 23-byte request is answered; anything
//!   else is closed without a reply
//! - **Bounded Reads**: Each connection gets one read with a configurable timeout
//! - **Async I/O**: Built on Tokio, one lightweight task per connection, so a
//!   stalled client never blocks new arrivals
//! - **Clean Shutdown**: Idempotent `stop()` that closes the listening socket
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashPolicy                                │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────────────┐    ┌─────────────────┐      │
//! │  │ TCP Server  │───>│  PolicyConnection   │───>│ PolicyDocument  │      │
//! │  │ (Listener)  │    │  read/validate/     │    │ (shared, Bytes) │      │
//! │  └──────┬──────┘    │  write/close        │    └─────────────────┘      │
//! │         │           └─────────────────────┘                             │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌────────────────────────────────────────┐                             │
//! │  │ Shutdown flag + watch channel (mutex)  │                             │
//! │  └────────────────────────────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashpolicy::{PolicyServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = ServerConfig::default();
//!     config.set_policy_file("/etc/flashpolicy/crossdomain.xml");
//!     config.set_socket_timeout("10");
//!
//!     let mut server = PolicyServer::new(config);
//!     server.init();
//!     server.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     server.stop();
//!     server.closed().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`policy`]: The request sentinel and the policy document
//! - [`config`]: Server configuration
//! - [`connection`]: Per-connection exchange and statistics
//! - [`server`]: Listener, accept loop and lifecycle

pub mod config;
pub mod connection;
pub mod policy;
pub mod server;

use std::time::Duration;

// Re-export commonly used types for convenience
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionError, ConnectionStats, Outcome};
pub use policy::{is_policy_request, ConfigLoadError, PolicyDocument, EXPECTED_REQUEST};
pub use server::{Phase, PolicyServer, ServerError};

/// The default port for socket policy requests
pub const DEFAULT_PORT: u16 = 843;

/// The default host FlashPolicy binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// The default wait for a client's policy request
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Version of FlashPolicy
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

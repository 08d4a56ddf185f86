//! Connection Handler Module
//!
//! This module manages individual client connections to the policy server.
//! Each client connection is handled by its own async task, so a client that
//! never sends its request only ever holds up itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PolicyServer                            │
//! │                  (server::listener)                         │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 PolicyConnection                            │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read (≤1KB, │───>│  Validate   │───>│ Write policy│     │
//! │  │  timeout)   │    │  sentinel   │    │ (on match)  │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │   Close     │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flashpolicy::connection::{handle_connection, ConnectionStats};
//! use flashpolicy::policy::PolicyDocument;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let policy = PolicyDocument::default();
//! let stats = Arc::new(ConnectionStats::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(
//!     Some(stream),
//!     addr,
//!     policy.clone(),
//!     Duration::from_secs(30),
//!     Arc::clone(&stats),
//! ));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionStats, Outcome, PolicyConnection,
    READ_BUFFER_SIZE,
};

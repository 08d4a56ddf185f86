//! Policy Server Module
//!
//! The listening side of the policy server: binds the socket, runs the
//! accept loop, and hands every accepted connection to its own
//! [`PolicyConnection`](crate::connection::PolicyConnection) task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PolicyServer                           │
//! │                                                             │
//! │   init() ──> PolicyDocument (loaded once, shared)           │
//! │                                                             │
//! │   start() ──> TcpListener ──> accept_loop (Tokio task)      │
//! │                                   │                         │
//! │                                   ├──> spawn connection     │
//! │                                   ├──> spawn connection     │
//! │                                   └──> ...                  │
//! │                                                             │
//! │   stop() ──> shutdown flag + watch signal ──> loop exits,   │
//! │              listener dropped                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Connections are unbounded: every accepted socket gets a task and there
//! is no connection cap. A client that connects and stays silent costs one
//! idle task until its read timeout fires.

pub mod listener;

// Re-export commonly used types
pub use listener::{Phase, PolicyServer, ServerError};

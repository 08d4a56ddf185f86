//! Socket Policy Protocol
//!
//! This module holds the two fixed pieces of the Flash/Flex socket policy
//! handshake: the request sentinel a client sends, and the cross-domain
//! policy document the server answers with.
//!
//! ## Wire Format
//!
//! ```text
//! Client                                   Server
//!   │                                        │
//!   │  <policy-file-request/>\0  (23 bytes)  │
//!   │ ─────────────────────────────────────> │
//!   │                                        │  exact length + prefix match?
//!   │  <cross-domain-policy>...\0            │
//!   │ <───────────────────────────────────── │
//!   │                                        │
//!   │               [close]                  │
//! ```
//!
//! Anything that is not exactly the sentinel gets no reply at all, the
//! connection is just closed.
//!
//! ## Modules
//!
//! - `request`: The expected request sentinel and its validation
//! - `document`: The immutable policy document and its file loader
//!
//! ## Example
//!
//! ```
//! use flashpolicy::policy::{is_policy_request, PolicyDocument, EXPECTED_REQUEST};
//!
//! assert!(is_policy_request(EXPECTED_REQUEST));
//!
//! let policy = PolicyDocument::default();
//! assert_eq!(policy.as_bytes().last(), Some(&0u8));
//! ```

pub mod document;
pub mod request;

// Re-export commonly used types for convenience
pub use document::{ConfigLoadError, PolicyDocument, DEFAULT_POLICY};
pub use request::{is_policy_request, EXPECTED_REQUEST, EXPECTED_REQUEST_LEN};

//! Policy Request Validation
//!
//! A Flash player asks for the socket policy by sending the literal string
//! `<policy-file-request/>` followed by a single NUL byte. There is no other
//! framing, so validation is a plain byte comparison.
//!
//! ## Exact Length
//!
//! The received chunk must be exactly as long as the sentinel. A chunk that
//! starts with the sentinel but carries trailing bytes (padding, pipelined
//! data) is rejected rather than prefix-matched.

/// The request a client must send, NUL terminator included.
pub const EXPECTED_REQUEST: &[u8] = b"<policy-file-request/>\0";

/// Length of [`EXPECTED_REQUEST`] in bytes (23).
pub const EXPECTED_REQUEST_LEN: usize = EXPECTED_REQUEST.len();

/// Returns true if `received` is exactly the policy request sentinel.
///
/// `received` is the slice of bytes actually read from the connection,
/// not the whole read buffer.
///
/// # Example
///
/// ```
/// use flashpolicy::policy::is_policy_request;
///
/// assert!(is_policy_request(b"<policy-file-request/>\0"));
/// assert!(!is_policy_request(b"<policy-file-request/>"));
/// assert!(!is_policy_request(b"<policy-file-request/>\0\0"));
/// ```
pub fn is_policy_request(received: &[u8]) -> bool {
    received.len() == EXPECTED_REQUEST_LEN && received.starts_with(EXPECTED_REQUEST)
}

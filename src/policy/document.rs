//! Cross-Domain Policy Document
//!
//! The policy document is the XML reply sent to every valid policy request.
//! It is loaded once at initialization and then shared, read-only, by every
//! connection task.
//!
//! ## Sharing
//!
//! The document is backed by `bytes::Bytes`, so cloning it for each
//! connection only bumps a reference count. Nothing ever mutates it after
//! construction.
//!
//! ## Loading From a File
//!
//! A configured policy file is read verbatim except for line breaks, which
//! are stripped (lines are concatenated without separators). A single NUL
//! byte is appended as the terminator.
//!
//! ```text
//! <policy>          ──>   <policy></policy>\0
//! </policy>
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

/// The built-in policy: allow any domain to connect to any port.
pub const DEFAULT_POLICY: &[u8] = b"<cross-domain-policy><site-control permitted-cross-domain-policies=\"master-only\"/><allow-access-from domain=\"*\" to-ports=\"*\" /></cross-domain-policy>\0";

/// Terminator appended to every document.
const NUL: u8 = 0;

/// Error raised when a configured policy file cannot be read.
#[derive(Debug, Error)]
#[error("unable to read policy file {}: {source}", .path.display())]
pub struct ConfigLoadError {
    /// The file that could not be read
    pub path: PathBuf,
    /// The underlying I/O failure
    #[source]
    pub source: std::io::Error,
}

/// An immutable, NUL-terminated policy document.
///
/// Invariant: never empty, always ends with exactly the NUL byte that was
/// appended at construction.
#[derive(Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    bytes: Bytes,
}

impl PolicyDocument {
    /// Builds a document from raw bytes, appending the NUL terminator if
    /// it is missing.
    ///
    /// An empty input produces the one-byte document `"\0"`.
    pub fn from_bytes(content: impl AsRef<[u8]>) -> Self {
        let content = content.as_ref();
        if content.last() == Some(&NUL) {
            return Self {
                bytes: Bytes::copy_from_slice(content),
            };
        }

        let mut buf = BytesMut::with_capacity(content.len() + 1);
        buf.put_slice(content);
        buf.put_u8(NUL);
        Self {
            bytes: buf.freeze(),
        }
    }

    /// Loads a document from a file.
    ///
    /// All `\r` and `\n` bytes are removed, then a NUL byte is appended.
    /// The file contents are otherwise passed through untouched, so the
    /// file does not need to be valid UTF-8.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigLoadError {
            path: path.to_path_buf(),
            source,
        })?;

        let mut buf = BytesMut::with_capacity(raw.len() + 1);
        for &b in raw.iter().filter(|&&b| b != b'\r' && b != b'\n') {
            buf.put_u8(b);
        }
        buf.put_u8(NUL);

        Ok(Self {
            bytes: buf.freeze(),
        })
    }

    /// Resolves the document to serve at initialization.
    ///
    /// With no path the built-in default is used. If the file cannot be
    /// read the failure is logged and the default stays in effect, so this
    /// never fails.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            let policy = Self::default();
            info!(policy = %policy, "Using default policy");
            return policy;
        };

        info!(path = %path.display(), "Using policy file");
        match Self::from_file(path) {
            Ok(document) => document,
            Err(e) => {
                error!(error = %e, "Falling back to default policy");
                Self::default()
            }
        }
    }

    /// Returns the bytes sent on the wire, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns a cheap handle to the underlying bytes.
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Length in bytes, terminator included.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a document holds at least its terminator.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            bytes: Bytes::from_static(DEFAULT_POLICY),
        }
    }
}

impl fmt::Debug for PolicyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyDocument")
            .field("len", &self.bytes.len())
            .field("content", &String::from_utf8_lossy(&self.bytes))
            .finish()
    }
}

impl fmt::Display for PolicyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Terminator is wire framing, not content
        let content = &self.bytes[..self.bytes.len() - 1];
        write!(f, "{}", String::from_utf8_lossy(content))
    }
}

//! Error types for trace runs.

use std::io;

use thiserror::Error;

/// Result type alias for trace operations.
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors raised while building probes, opening sockets or reading replies.
#[derive(Error, Debug)]
pub enum TraceError {
    /// A raw send or receive socket could not be opened or configured.
    /// Fatal to the one trace that hit it.
    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    /// The probe could not be serialized. Skips one TTL.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// An inbound ICMP message could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Transmission of a probe failed. Skips one TTL.
    #[error("send failed at ttl {ttl}: {source}")]
    Send {
        ttl: u8,
        #[source]
        source: io::Error,
    },
}

impl TraceError {
    /// Whether the error means the process lacks raw socket privileges.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Socket(e) if e.kind() == io::ErrorKind::PermissionDenied)
    }
}

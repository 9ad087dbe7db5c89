//! Error types for the DHCP codec, client and server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Protocol soft failures (timeouts,
//! transaction id mismatches, an exhausted pool) are not errors; they surface
//! as `Ok(None)` from the operation that hit them.

/// Errors that can occur while encoding, decoding or serving DHCP messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (settings file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP message received.
    ///
    /// This includes messages shorter than the fixed header, a wrong magic
    /// cookie, and options whose payload is shorter than their declared
    /// length or has the wrong size for the option type.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// A value that cannot be represented on the wire, rejected when it is
    /// assigned (e.g. a message type outside 1..=8).
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Invalid server or client configuration.
    ///
    /// Raised while building a [`ServerConfig`](crate::ServerConfig) and
    /// fatal to startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67/68 without administrator
    /// privileges.
    #[error("Socket error: {0}")]
    Socket(String),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;

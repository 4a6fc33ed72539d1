//! Error types for the gateway's connection, pool, and dispatch layers.
//!
//! Every variant corresponds to one of the error kinds in the design's
//! error-handling model: configuration, authentication, alias collision,
//! transport loss, cancellation, and validation. Remote non-zero exit is
//! deliberately *not* represented here — the command completed, so its
//! exit code rides alongside a successful [`crate::connection::RunResult`].

use thiserror::Error;

/// Errors that can occur anywhere in the connection, manager, pool, or
/// dispatch layers.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Startup-time configuration problem: unusable key directory, port
    /// already bound, etc. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No usable credential, or the remote end refused authentication.
    #[error("authentication failed for {user}@{host}: {reason}")]
    Authentication {
        user: String,
        host: String,
        reason: String,
    },

    /// Requested alias already names a different `user@host`.
    #[error("alias '{0}' already in use for a different host")]
    AliasCollision(String),

    /// Auto-generated alias space exhausted (tried base name plus 99 suffixes).
    #[error("could not allocate an alias for {0}: too many collisions")]
    AliasSpaceExhausted(String),

    /// `target` does not name a live alias, or resolves to no primary.
    #[error("no such alias: {0}")]
    NoSuchAlias(String),

    /// The underlying transport was lost mid-operation, after one
    /// transparent reconnect-and-retry was already attempted.
    #[error("transport lost for alias '{alias}': {reason}")]
    TransportLost { alias: String, reason: String },

    /// A jump alias named by `via` does not exist or is not live.
    #[error("jump host '{0}' is not connected")]
    JumpHostUnavailable(String),

    /// The caller's context deadline expired, or the client disconnected.
    #[error("operation on '{alias}' cancelled: {reason}")]
    Cancelled { alias: String, reason: String },

    /// Unknown tool name, missing required argument, bad path, etc.
    /// Rejected before any connection is touched.
    #[error("validation error: {0}")]
    Validation(String),

    /// The tenant named by the request context has no registered Manager.
    #[error("inactive session")]
    InactiveSession,

    /// Lower-level SSH transport error (handshake, channel, auth exchange).
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),

    /// SSH key parsing/generation error.
    #[error("ssh key error: {0}")]
    SshKeys(#[from] russh::keys::Error),

    /// SFTP protocol-level error.
    #[error("sftp error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    /// Filesystem I/O error (key store, path probing).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// True if this error's display text matches a known transport-loss
    /// signature (connection reset, broken pipe, EOF, refused). Used by the
    /// manager to decide whether to reconnect-and-retry.
    pub fn looks_like_transport_loss(&self) -> bool {
        crate::manager::transport_loss_signature(&self.to_string())
    }
}

//! Session error taxonomy.
//!
//! Nothing here is fatal to the process. Transport and protocol failures
//! cycle the session back through reconnect backoff; auth rejections retry
//! on the same schedule forever; command timeouts are reported to the
//! command's originator while the link stays up.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::CodecError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed frame or checksum mismatch: the byte stream is
    /// desynchronized and the link is dropped, same as a transport failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("login rejected by pump (status 0x{0:02x})")]
    AuthRejected(u8),

    #[error("no login acknowledgment within the auth window")]
    AuthTimeout,

    #[error("command not acknowledged within {0:?}")]
    CommandTimeout(Duration),

    #[error("command rejected by pump (status 0x{0:02x})")]
    CommandRejected(u8),

    #[error("unexpected {0} frame from pump")]
    UnexpectedFrame(&'static str),

    #[error("no status traffic within the keep-alive window")]
    IdleTimeout,

    #[error("pump link is down")]
    NotConnected,

    #[error("session is shutting down")]
    ShuttingDown,
}

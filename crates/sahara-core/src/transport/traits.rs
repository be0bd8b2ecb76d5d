//! Transport layer abstraction.
//!
//! Defines the `Transport` trait for the raw byte stream to the modem,
//! allowing different implementations (tcp, mock, etc.). The engine
//! never opens connections itself; a transport is handed in by the
//! caller and owned by one session for its whole lifetime.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {message}")]
    ConnectFailed { endpoint: String, message: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("receive timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract blocking byte-stream transport.
pub trait Transport: Send {
    /// Send the whole buffer.
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive up to `max_len` bytes, blocking up to the transport's
    /// configured timeout. An empty result means the peer closed.
    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Tear down the connection. Further calls may fail.
    fn close(&mut self);
}

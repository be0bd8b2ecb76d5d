//! TCP transport for the router's diagnostic proxy ports.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::info;

use super::traits::{Transport, TransportError};

/// Blocking TCP byte stream with a fixed receive timeout.
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
}

impl TcpTransport {
    /// Connect and arm the read timeout. A read that exceeds it surfaces
    /// as `TransportError::Timeout`.
    pub fn connect<A>(addr: A, timeout: Duration) -> Result<Self, TransportError>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let peer = addr.to_string();
        let stream = TcpStream::connect(&addr).map_err(|e| TransportError::ConnectFailed {
            endpoint: peer.clone(),
            message: e.to_string(),
        })?;
        stream.set_read_timeout(Some(timeout))?;
        info!(peer = %peer, timeout_secs = timeout.as_secs(), "connected");
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream
            .write_all(data)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len];
        match self.stream.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::Timeout)
            }
            Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

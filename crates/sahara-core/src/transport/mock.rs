//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{Transport, TransportError};

/// One scripted reply, consumed by a `receive` call.
#[derive(Debug, Clone)]
enum Reply {
    /// Bytes to hand back (split across calls if larger than `max_len`).
    Bytes(Vec<u8>),
    /// Simulated read timeout.
    Timeout,
    /// Peer-closed: an empty read.
    Closed,
}

/// Mock transport for unit testing session logic.
///
/// Clones share the same script and write log, so a test can keep a
/// handle while the session owns the transport.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued replies returned on receive.
    replies: Arc<Mutex<VecDeque<Reply>>>,
    /// Captured sends.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether close() has been called.
    closed: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue bytes to be returned on the next receive.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Bytes(bytes.to_vec()));
    }

    /// Queue a simulated read timeout.
    pub fn queue_timeout(&self) {
        self.replies.lock().unwrap().push_back(Reply::Timeout);
    }

    /// Queue a peer close (empty read).
    pub fn queue_close(&self) {
        self.replies.lock().unwrap().push_back(Reply::Closed);
    }

    /// Get all captured sends.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured sends.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Whether the session closed the transport.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut replies = self.replies.lock().unwrap();
        match replies.pop_front() {
            Some(Reply::Bytes(mut bytes)) => {
                if bytes.len() > max_len {
                    let rest = bytes.split_off(max_len);
                    replies.push_front(Reply::Bytes(rest));
                }
                Ok(bytes)
            }
            Some(Reply::Timeout) => Err(TransportError::Timeout),
            Some(Reply::Closed) => Ok(Vec::new()),
            // Script exhausted: behave like a silent peer.
            None => Err(TransportError::Timeout),
        }
    }

    fn close(&mut self) {
        *self.closed.lock().unwrap() = true;
    }
}

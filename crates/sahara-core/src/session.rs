//! Session orchestration.
//!
//! One `SaharaSession` owns one transport for its whole lifetime: it
//! negotiates a mode, runs the crash-info or memory-debug flow, and
//! tears the link down with RESET on every exit path, success or
//! failure.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::crash_info::CrashReport;
use crate::download::DumpResult;
use crate::events::{PacketDirection, SaharaEvent, SaharaObserver, TracingObserver};
use crate::protocol::constants::*;
use crate::protocol::packet::{self, Mode, ProtocolError, ReadKind, Status};
use crate::sink::OutputSink;
use crate::transport::{Transport, TransportError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected command {actual:#04x} where {expected:#04x} was expected")]
    UnexpectedCommand { expected: u32, actual: u32 },

    #[error("memory table contains no regions")]
    InvalidMemoryTable,

    #[error("{context}: gave up after {attempts} attempts")]
    RetriesExhausted {
        context: &'static str,
        attempts: u32,
    },

    #[error("stream desynchronized: {attempts} consecutive length mismatches")]
    ProtocolDesync { attempts: u32 },

    #[error("session cancelled")]
    Cancelled,

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

/// State of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ModeSwitchSent,
    AwaitHello,
    HelloRespSent,
    AwaitReady,
    CommandFlow,
    MemoryDebugFlow,
    ResetSent,
    Closed,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::ModeSwitchSent => write!(f, "MODE_SWITCH_SENT"),
            SessionState::AwaitHello => write!(f, "AWAIT_HELLO"),
            SessionState::HelloRespSent => write!(f, "HELLO_RESP_SENT"),
            SessionState::AwaitReady => write!(f, "AWAIT_READY"),
            SessionState::CommandFlow => write!(f, "COMMAND_FLOW"),
            SessionState::MemoryDebugFlow => write!(f, "MEMORY_DEBUG_FLOW"),
            SessionState::ResetSent => write!(f, "RESET_SENT"),
            SessionState::Closed => write!(f, "CLOSED"),
            SessionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Bounded retry for exchanges the target may answer badly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per exchange before giving up.
    pub max_attempts: u32,
    /// Delay between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Configuration for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub retry: RetryPolicy,
    /// Receive timeout armed on the transport by the caller.
    pub receive_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            receive_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }
}

/// Cooperative cancellation flag, checked between receive calls.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A fully received framed packet.
pub(crate) struct FramedPacket {
    pub(crate) command: u32,
    pub(crate) bytes: Vec<u8>,
}

impl FramedPacket {
    pub(crate) fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes = self.bytes.get(offset..offset.checked_add(4)?)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

pub(crate) enum RetryCause {
    /// Declared/requested byte count did not match receipt.
    LengthError,
    /// Anything else worth another attempt.
    Other,
}

pub(crate) struct RetryState {
    context: &'static str,
    attempts: u32,
    mismatches: u32,
}

impl RetryState {
    pub(crate) fn new(context: &'static str) -> Self {
        Self {
            context,
            attempts: 0,
            mismatches: 0,
        }
    }
}

/// Sahara session - drives one crash-info or RAM-dump exchange.
pub struct SaharaSession<T: Transport, O: SaharaObserver> {
    pub(crate) transport: T,
    pub(crate) config: SessionConfig,
    pub(crate) observer: Arc<O>,
    cancel: CancelToken,
    state: SessionState,
    /// Error count for the current exchange only; cleared by any clean
    /// receive.
    pkt_err_cnt: u32,
}

impl<T: Transport> SaharaSession<T, TracingObserver> {
    /// Create a new session with the default tracing observer.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: Transport, O: SaharaObserver> SaharaSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(transport: T, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            transport,
            config,
            observer,
            cancel: CancelToken::new(),
            state: SessionState::Idle,
            pkt_err_cnt: 0,
        }
    }

    /// Token for cancelling this session from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Collect the four crash-info fields over the command-mode flow and
    /// write the report through `sink`.
    #[instrument(skip(self, sink))]
    pub fn run_crash_info<S: OutputSink>(
        mut self,
        sink: &mut S,
    ) -> Result<CrashReport, SessionError> {
        info!(mode = %Mode::Command, "session starting");
        let result = self.drive_crash_info(sink);
        self.finish(result.is_ok());
        result
    }

    /// Download every memory region announced by the target through
    /// `sink`.
    #[instrument(skip(self, sink))]
    pub fn run_ram_dump<S: OutputSink>(mut self, sink: &mut S) -> Result<DumpResult, SessionError> {
        info!(mode = %Mode::MemoryDebug, "session starting");
        let result = self.drive_ram_dump(sink);
        self.finish(result.is_ok());
        result
    }

    fn drive_crash_info<S: OutputSink>(&mut self, sink: &mut S) -> Result<CrashReport, SessionError> {
        self.negotiate(Mode::Command)?;
        self.goto_state(SessionState::CommandFlow);
        self.collect_crash_info(sink)
    }

    fn drive_ram_dump<S: OutputSink>(&mut self, sink: &mut S) -> Result<DumpResult, SessionError> {
        let ready = self.negotiate(Mode::MemoryDebug)?;
        let (Some(table_addr), Some(table_len)) = (ready.u32_at(8), ready.u32_at(12)) else {
            return Err(SessionError::InvalidMemoryTable);
        };
        if table_len == 0 {
            return Err(SessionError::InvalidMemoryTable);
        }
        self.goto_state(SessionState::MemoryDebugFlow);
        info!(
            addr = %format!("{table_addr:#010x}"),
            len = table_len,
            "memory table announced"
        );
        let mut table = self.fetch_memory_table(table_addr, table_len)?;
        self.download_regions(sink, &mut table)
    }

    /// Switch to `mode`, answer the HELLO, and wait for the target's
    /// ready packet, which is returned.
    fn negotiate(&mut self, mode: Mode) -> Result<FramedPacket, SessionError> {
        self.goto_state(SessionState::ModeSwitchSent);
        self.send_packet(&packet::switch_mode(mode))?;

        self.goto_state(SessionState::AwaitHello);
        let hello = self.recv_framed()?;
        if hello.command != CMD_HELLO {
            warn!(
                command = %format!("{:#04x}", hello.command),
                mode = %mode,
                "protocol not supported"
            );
            return Err(SessionError::UnexpectedCommand {
                expected: CMD_HELLO,
                actual: hello.command,
            });
        }

        self.goto_state(SessionState::HelloRespSent);
        self.send_packet(&packet::hello_response(mode))?;

        self.goto_state(SessionState::AwaitReady);
        let expected = mode.ready_command();
        let mut retry = RetryState::new("ready wait");
        loop {
            match self.recv_framed() {
                Ok(pkt)
                    if pkt.command == expected
                        && packet::expected_len(expected) == Some(pkt.bytes.len() as u32) =>
                {
                    return Ok(pkt);
                }
                Ok(pkt) => {
                    warn!(
                        command = %format!("{:#04x}", pkt.command),
                        len = pkt.bytes.len(),
                        "still waiting for ready"
                    );
                    self.retry_tick(&mut retry, RetryCause::Other)?;
                }
                Err(e) => self.retry_recv_failure(&mut retry, e)?,
            }
        }
    }

    /// RESET goes out on every exit path; the target reboots and no
    /// response is awaited.
    fn finish(&mut self, success: bool) {
        if !success {
            self.goto_state(SessionState::Aborted);
        }
        self.goto_state(SessionState::ResetSent);
        info!("resetting target");
        if let Err(e) = self.send_packet(&packet::reset()) {
            warn!(error = %e, "reset send failed");
        }
        self.transport.close();
        self.goto_state(SessionState::Closed);
        if success {
            self.observer.on_event(&SaharaEvent::Complete);
        }
    }

    fn goto_state(&mut self, next: SessionState) {
        self.observer.on_event(&SaharaEvent::StateChanged {
            from: self.state,
            to: next,
        });
        self.state = next;
    }

    pub(crate) fn send_packet(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let (command, _) = packet::decode_header(bytes)?;
        self.transport.send(bytes)?;
        debug!(
            command = %format!("{command:#04x}"),
            len = bytes.len(),
            "sent packet"
        );
        self.observer.on_event(&SaharaEvent::Packet {
            direction: PacketDirection::Tx,
            command,
            length: bytes.len(),
        });
        Ok(())
    }

    pub(crate) fn recv_framed(&mut self) -> Result<FramedPacket, SessionError> {
        let bytes = self.recv_bytes(ReadKind::Framed)?;
        let (command, _) = packet::decode_header(&bytes)?;
        self.observer.on_event(&SaharaEvent::Packet {
            direction: PacketDirection::Rx,
            command,
            length: bytes.len(),
        });
        Ok(FramedPacket { command, bytes })
    }

    pub(crate) fn recv_raw(&mut self, requested: usize) -> Result<Vec<u8>, SessionError> {
        if requested == 0 {
            return Ok(Vec::new());
        }
        self.recv_bytes(ReadKind::Raw { requested })
    }

    /// Accumulate transport chunks until `classify` rules the buffer
    /// complete or terminal.
    fn recv_bytes(&mut self, kind: ReadKind) -> Result<Vec<u8>, SessionError> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            let chunk = match self.transport.receive(MAX_MEM_READ_LEN) {
                Ok(chunk) => chunk,
                Err(TransportError::Timeout) if !buf.is_empty() => {
                    // The peer went quiet mid-packet: classify what we have.
                    self.pkt_err_cnt += 1;
                    return Err(packet::underrun_error(&buf, kind).into());
                }
                Err(e) => return Err(e.into()),
            };
            if chunk.is_empty() {
                return Err(TransportError::PeerClosed.into());
            }
            buf.extend_from_slice(&chunk);
            match packet::classify(&buf, kind)? {
                Status::NeedMore => continue,
                Status::Complete => {
                    self.pkt_err_cnt = 0;
                    return Ok(buf);
                }
            }
        }
    }

    /// Record one failed attempt; error out once the policy's budget is
    /// spent, otherwise back off.
    pub(crate) fn retry_tick(
        &mut self,
        retry: &mut RetryState,
        cause: RetryCause,
    ) -> Result<(), SessionError> {
        retry.attempts += 1;
        if let RetryCause::LengthError = cause {
            retry.mismatches += 1;
        }
        if retry.attempts >= self.config.retry.max_attempts {
            if retry.mismatches == retry.attempts {
                return Err(SessionError::ProtocolDesync {
                    attempts: retry.attempts,
                });
            }
            return Err(SessionError::RetriesExhausted {
                context: retry.context,
                attempts: retry.attempts,
            });
        }
        let backoff = self.config.retry.backoff();
        if !backoff.is_zero() {
            thread::sleep(backoff);
        }
        Ok(())
    }

    /// Retry on recoverable receive errors; everything else is fatal to
    /// the session.
    pub(crate) fn retry_recv_failure(
        &mut self,
        retry: &mut RetryState,
        err: SessionError,
    ) -> Result<(), SessionError> {
        match &err {
            SessionError::Protocol(p) => match p {
                ProtocolError::InvalidLength { .. } | ProtocolError::LengthMismatch { .. } => {
                    warn!(
                        context = retry.context,
                        err_cnt = self.pkt_err_cnt,
                        error = %p,
                        "length error, retrying"
                    );
                    self.retry_tick(retry, RetryCause::LengthError)
                }
                ProtocolError::MalformedPacket { .. } => {
                    warn!(context = retry.context, error = %p, "short packet, retrying");
                    self.retry_tick(retry, RetryCause::Other)
                }
                // Oversized headers and transfer aborts are not ours to
                // retry at this level.
                _ => Err(err),
            },
            _ => Err(err),
        }
    }
}

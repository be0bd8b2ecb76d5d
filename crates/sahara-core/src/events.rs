//! Event system for UI decoupling.
//!
//! Allows CLI/TUI/GUI layers to subscribe to session events without
//! tight coupling to the protocol engine.

use std::fmt;

use crate::session::SessionState;

/// Packet direction on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Target
    Rx, // Target -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone)]
pub enum SaharaEvent {
    /// State machine transition.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Framed packet sent or received.
    Packet {
        direction: PacketDirection,
        command: u32,
        length: usize,
    },
    /// One crash-info field collected.
    CrashField { label: String, value: String },
    /// Region download starting.
    RegionStarted {
        index: usize,
        total: usize,
        filename: String,
        len: u32,
    },
    /// Region progress crossed a 10-point threshold (or hit 100).
    RegionProgress {
        index: usize,
        total: usize,
        percent: u32,
    },
    /// Region finished, completely or truncated by the target.
    RegionFinished {
        index: usize,
        bytes_written: u64,
        complete: bool,
    },
    /// The session ran to completion.
    Complete,
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait SaharaObserver: Send + Sync {
    fn on_event(&self, event: &SaharaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SaharaObserver for NullObserver {
    fn on_event(&self, _event: &SaharaEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SaharaObserver for TracingObserver {
    fn on_event(&self, event: &SaharaEvent) {
        match event {
            SaharaEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "state changed");
            }
            SaharaEvent::Packet {
                direction,
                command,
                length,
            } => {
                tracing::trace!(
                    dir = %direction,
                    command = %format!("{command:#04x}"),
                    len = length,
                    "packet"
                );
            }
            SaharaEvent::CrashField { label, value } => {
                tracing::info!(field = %label, value = %value, "crash info field");
            }
            SaharaEvent::RegionStarted {
                index,
                total,
                filename,
                len,
            } => {
                tracing::info!(
                    region = index + 1,
                    total,
                    file = %filename,
                    len,
                    "region download started"
                );
            }
            SaharaEvent::RegionProgress {
                index,
                total,
                percent,
            } => {
                tracing::info!(
                    region = index + 1,
                    total,
                    progress = %format!("{percent}%"),
                    "region progress"
                );
            }
            SaharaEvent::RegionFinished {
                index,
                bytes_written,
                complete,
            } => {
                if *complete {
                    tracing::info!(region = index + 1, bytes = bytes_written, "region complete");
                } else {
                    tracing::warn!(
                        region = index + 1,
                        bytes = bytes_written,
                        "region truncated by target"
                    );
                }
            }
            SaharaEvent::Complete => {
                tracing::info!("session complete");
            }
        }
    }
}

//! Sahara-core: diagnostic-download protocol engine for cellular modems.
//!
//! This crate implements the subset of the Sahara boot protocol needed
//! to pull basic crash information and full memory (RAM) dumps from a
//! crashed modem over a raw byte-stream transport.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, packet encoders, receive classification
//! - **Transport**: Byte-stream abstraction (tcp, mock)
//! - **Memory**: Region-table parsing and read cursors
//! - **Session**: Mode negotiation, retry policy, teardown
//! - **Crash info / Download**: The two negotiated flows
//! - **Events**: Observer pattern for UI decoupling
//! - **Sink**: Output artifact abstraction (directory, in-memory)
//!
//! # Example
//!
//! ```no_run
//! use sahara_core::{DirSink, SaharaSession, SessionConfig, TcpTransport};
//!
//! let config = SessionConfig::default();
//! let transport =
//!     TcpTransport::connect("192.168.0.1:8890", config.receive_timeout()).expect("connect");
//! let mut sink = DirSink::new("ramdump").expect("output dir");
//!
//! let session = SaharaSession::new(transport, config);
//! let dump = session.run_ram_dump(&mut sink).expect("RAM dump failed");
//! println!("{} regions, {} bytes", dump.regions.len(), dump.total_bytes());
//! ```

pub mod crash_info;
pub mod download;
pub mod events;
pub mod memory;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

// Re-exports for convenience
pub use crash_info::{CRASH_REPORT_NAME, CrashField, CrashReport};
pub use download::{DumpResult, RegionDump};
pub use events::{NullObserver, PacketDirection, SaharaEvent, SaharaObserver, TracingObserver};
pub use memory::{MemoryRegion, MemoryTable};
pub use protocol::{Mode, ProtocolError};
pub use session::{
    CancelToken, RetryPolicy, SaharaSession, SessionConfig, SessionError, SessionState,
};
pub use sink::{DirSink, MemorySink, OutputSink, SinkFile};
pub use transport::{MockTransport, TcpTransport, Transport, TransportError};

//! Protocol module - Sahara wire format definitions.

pub mod constants;
pub mod packet;

pub use constants::*;
pub use packet::{Mode, ProtocolError, ReadKind, Status, classify, decode_header};

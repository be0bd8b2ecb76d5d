//! Packet codec for the Sahara command set.
//!
//! Every packet opens with two little-endian u32 fields: command id and
//! total declared length. Encoders produce exact wire images; `classify`
//! implements the receive-side validation rules for framed and raw
//! (streaming) reads.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed packet: {actual} bytes where an 8-byte header was expected")]
    MalformedPacket { actual: usize },

    #[error("invalid length: header declares {declared} bytes, received {actual}")]
    InvalidLength { declared: u32, actual: usize },

    #[error("length mismatch: requested {requested} bytes, received {actual}")]
    LengthMismatch { requested: usize, actual: usize },

    #[error("target ended the image transfer early")]
    InvalidEndOfImage,

    #[error("header declares {declared} bytes, over the {limit} byte ceiling")]
    OversizedPacket { declared: u32, limit: u32 },
}

/// Operating mode negotiated at mode-switch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Crash-info command mode.
    Command,
    /// Full memory dump mode.
    MemoryDebug,
}

impl Mode {
    pub fn wire_value(self) -> u32 {
        match self {
            Mode::Command => MODE_COMMAND,
            Mode::MemoryDebug => MODE_MEMORY_DEBUG,
        }
    }

    /// The command the target sends once the mode is up.
    pub fn ready_command(self) -> u32 {
        match self {
            Mode::Command => CMD_READY,
            Mode::MemoryDebug => CMD_MEMORY_DEBUG,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Command => write!(f, "command"),
            Mode::MemoryDebug => write!(f, "memory-debug"),
        }
    }
}

/// How a receive is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// Completion is governed by the length field in the packet header.
    Framed,
    /// Streaming read; success is exactly the requested byte count.
    Raw { requested: usize },
}

/// Verdict on an accumulating receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Keep reading.
    NeedMore,
    /// Packet complete and well-formed.
    Complete,
}

fn header(command: u32, declared: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(declared as usize);
    buf.write_u32::<LittleEndian>(command).unwrap();
    buf.write_u32::<LittleEndian>(declared).unwrap();
    buf
}

/// CMD_SWITCH_MODE - request the target enter `mode`.
pub fn switch_mode(mode: Mode) -> Vec<u8> {
    let mut buf = header(CMD_SWITCH_MODE, LEN_SWITCH_MODE);
    buf.write_u32::<LittleEndian>(mode.wire_value()).unwrap();
    buf
}

/// CMD_HELLO_RESP - echo protocol versions and the requested mode.
pub fn hello_response(mode: Mode) -> Vec<u8> {
    let mut buf = header(CMD_HELLO_RESP, LEN_HELLO_RESP);
    buf.write_u32::<LittleEndian>(PROTOCOL_VERSION).unwrap();
    buf.write_u32::<LittleEndian>(PROTOCOL_COMPAT_VERSION).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap(); // status
    buf.write_u32::<LittleEndian>(mode.wire_value()).unwrap();
    for _ in 0..6 {
        buf.write_u32::<LittleEndian>(0).unwrap(); // reserved
    }
    buf
}

/// CMD_MEMORY_READ - request `len` bytes starting at `addr`.
///
/// Caller invariant: `len` is never 0.
pub fn memory_read(addr: u32, len: u32) -> Vec<u8> {
    let mut buf = header(CMD_MEMORY_READ, LEN_MEMORY_READ);
    buf.write_u32::<LittleEndian>(addr).unwrap();
    buf.write_u32::<LittleEndian>(len).unwrap();
    buf
}

/// CMD_EXECUTE - run one of the fixed read commands on the target.
pub fn command_execute(code: u32) -> Vec<u8> {
    let mut buf = header(CMD_EXECUTE, LEN_EXECUTE);
    buf.write_u32::<LittleEndian>(code).unwrap();
    buf
}

/// CMD_EXECUTE_DATA - ask for the payload of an executed command.
pub fn command_execute_data(code: u32) -> Vec<u8> {
    let mut buf = header(CMD_EXECUTE_DATA, LEN_EXECUTE_DATA);
    buf.write_u32::<LittleEndian>(code).unwrap();
    buf
}

/// CMD_RESET - header only; the target reboots without replying.
pub fn reset() -> Vec<u8> {
    header(CMD_RESET, LEN_RESET)
}

/// Split the 8-byte header into (command id, declared length).
pub fn decode_header(buf: &[u8]) -> Result<(u32, u32), ProtocolError> {
    if buf.len() < 8 {
        return Err(ProtocolError::MalformedPacket { actual: buf.len() });
    }
    let mut cursor = Cursor::new(buf);
    let command = cursor.read_u32::<LittleEndian>().unwrap();
    let declared = cursor.read_u32::<LittleEndian>().unwrap();
    Ok((command, declared))
}

/// The fixed declared length for a command id, if it has one.
pub fn expected_len(command: u32) -> Option<u32> {
    match command {
        CMD_HELLO => Some(LEN_HELLO),
        CMD_HELLO_RESP => Some(LEN_HELLO_RESP),
        CMD_READ_DATA => Some(LEN_READ_DATA),
        CMD_END_TRANSFER_IMAGE => Some(LEN_END_TRANSFER_IMAGE),
        CMD_DONE => Some(LEN_DONE),
        CMD_DONE_RESP => Some(LEN_DONE_RESP),
        CMD_RESET => Some(LEN_RESET),
        CMD_RESET_RESP => Some(LEN_RESET_RESP),
        CMD_MEMORY_DEBUG => Some(LEN_MEMORY_DEBUG),
        CMD_MEMORY_READ => Some(LEN_MEMORY_READ),
        CMD_READY => Some(LEN_READY),
        CMD_SWITCH_MODE => Some(LEN_SWITCH_MODE),
        CMD_EXECUTE => Some(LEN_EXECUTE),
        CMD_EXECUTE_RESP => Some(LEN_EXECUTE_RESP),
        CMD_EXECUTE_DATA => Some(LEN_EXECUTE_DATA),
        _ => None,
    }
}

/// Validate an accumulating receive buffer.
///
/// A 16-byte END_TRANSFER_IMAGE wins over the framed/raw rules in both
/// modes: it is the target aborting the transfer, not an error in
/// receipt.
pub fn classify(buf: &[u8], kind: ReadKind) -> Result<Status, ProtocolError> {
    let hdr = if buf.len() >= 8 {
        Some(decode_header(buf)?)
    } else {
        None
    };

    if let Some((command, declared)) = hdr
        && command == CMD_END_TRANSFER_IMAGE
        && declared == LEN_END_TRANSFER_IMAGE
        && buf.len() as u32 == LEN_END_TRANSFER_IMAGE
    {
        return Err(ProtocolError::InvalidEndOfImage);
    }

    match kind {
        ReadKind::Framed => {
            let Some((_, declared)) = hdr else {
                return Ok(Status::NeedMore);
            };
            if declared > MAX_FRAMED_PACKET_LEN {
                return Err(ProtocolError::OversizedPacket {
                    declared,
                    limit: MAX_FRAMED_PACKET_LEN,
                });
            }
            match (buf.len() as u32).cmp(&declared) {
                Ordering::Less => Ok(Status::NeedMore),
                Ordering::Equal => Ok(Status::Complete),
                Ordering::Greater => Err(ProtocolError::InvalidLength {
                    declared,
                    actual: buf.len(),
                }),
            }
        }
        ReadKind::Raw { requested } => match buf.len().cmp(&requested) {
            Ordering::Less => Ok(Status::NeedMore),
            Ordering::Equal => Ok(Status::Complete),
            Ordering::Greater => Err(ProtocolError::LengthMismatch {
                requested,
                actual: buf.len(),
            }),
        },
    }
}

/// Terminal classification for a receive that stopped short (the peer
/// went quiet with bytes already accumulated).
pub fn underrun_error(buf: &[u8], kind: ReadKind) -> ProtocolError {
    match kind {
        ReadKind::Raw { requested } => ProtocolError::LengthMismatch {
            requested,
            actual: buf.len(),
        },
        ReadKind::Framed => match decode_header(buf) {
            Ok((_, declared)) => ProtocolError::InvalidLength {
                declared,
                actual: buf.len(),
            },
            Err(e) => e,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoders_roundtrip_header() {
        let cases: Vec<(Vec<u8>, u32, u32)> = vec![
            (switch_mode(Mode::Command), CMD_SWITCH_MODE, LEN_SWITCH_MODE),
            (hello_response(Mode::MemoryDebug), CMD_HELLO_RESP, LEN_HELLO_RESP),
            (memory_read(0x1000, 0x7F0), CMD_MEMORY_READ, LEN_MEMORY_READ),
            (command_execute(EXEC_CRASH_INFO_READ), CMD_EXECUTE, LEN_EXECUTE),
            (
                command_execute_data(EXEC_SERIAL_NUM_READ),
                CMD_EXECUTE_DATA,
                LEN_EXECUTE_DATA,
            ),
            (reset(), CMD_RESET, LEN_RESET),
        ];
        for (bytes, command, declared) in cases {
            let (c, d) = decode_header(&bytes).unwrap();
            assert_eq!(c, command);
            assert_eq!(d, declared);
            assert_eq!(bytes.len() as u32, declared);
        }
    }

    #[test]
    fn test_hello_response_fields() {
        let bytes = hello_response(Mode::Command);
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[8..12], &PROTOCOL_VERSION.to_le_bytes());
        assert_eq!(&bytes[12..16], &PROTOCOL_COMPAT_VERSION.to_le_bytes());
        assert_eq!(&bytes[16..20], &0u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &MODE_COMMAND.to_le_bytes());
        assert!(bytes[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_header_too_short() {
        assert_eq!(
            decode_header(&[0x01, 0x00, 0x00]),
            Err(ProtocolError::MalformedPacket { actual: 3 })
        );
    }

    fn framed_packet(command: u32, declared: u32, body: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&command.to_le_bytes());
        buf.extend_from_slice(&declared.to_le_bytes());
        buf.extend(std::iter::repeat(0u8).take(body));
        buf
    }

    #[test]
    fn test_classify_framed_short_then_complete() {
        // HELLO declares 48 bytes; 47 is not a packet yet, 48 is.
        let full = framed_packet(CMD_HELLO, LEN_HELLO, 40);
        assert_eq!(
            classify(&full[..47], ReadKind::Framed).unwrap(),
            Status::NeedMore
        );
        assert_eq!(classify(&full, ReadKind::Framed).unwrap(), Status::Complete);
    }

    #[test]
    fn test_classify_framed_overrun() {
        let mut buf = framed_packet(CMD_HELLO, LEN_HELLO, 40);
        buf.push(0xAA);
        assert_eq!(
            classify(&buf, ReadKind::Framed),
            Err(ProtocolError::InvalidLength {
                declared: LEN_HELLO,
                actual: 49
            })
        );
    }

    #[test]
    fn test_classify_underrun_after_timeout() {
        let full = framed_packet(CMD_HELLO, LEN_HELLO, 40);
        assert_eq!(
            underrun_error(&full[..47], ReadKind::Framed),
            ProtocolError::InvalidLength {
                declared: LEN_HELLO,
                actual: 47
            }
        );
        assert_eq!(
            underrun_error(&full[..5], ReadKind::Framed),
            ProtocolError::MalformedPacket { actual: 5 }
        );
        assert_eq!(
            underrun_error(&full[..20], ReadKind::Raw { requested: 64 }),
            ProtocolError::LengthMismatch {
                requested: 64,
                actual: 20
            }
        );
    }

    #[test]
    fn test_classify_raw_exact_and_overrun() {
        let data = vec![0x5A; 100];
        assert_eq!(
            classify(&data[..64], ReadKind::Raw { requested: 100 }).unwrap(),
            Status::NeedMore
        );
        assert_eq!(
            classify(&data, ReadKind::Raw { requested: 100 }).unwrap(),
            Status::Complete
        );
        assert_eq!(
            classify(&data, ReadKind::Raw { requested: 64 }),
            Err(ProtocolError::LengthMismatch {
                requested: 64,
                actual: 100
            })
        );
    }

    #[test]
    fn test_classify_end_of_image_in_both_kinds() {
        let pkt = framed_packet(CMD_END_TRANSFER_IMAGE, LEN_END_TRANSFER_IMAGE, 8);
        assert_eq!(
            classify(&pkt, ReadKind::Framed),
            Err(ProtocolError::InvalidEndOfImage)
        );
        assert_eq!(
            classify(&pkt, ReadKind::Raw { requested: 2032 }),
            Err(ProtocolError::InvalidEndOfImage)
        );
        // A 16-byte raw payload that merely resembles the abort header in
        // its first field does not trip the rule.
        let benign = framed_packet(CMD_END_TRANSFER_IMAGE, 0x99, 8);
        assert_eq!(
            classify(&benign, ReadKind::Raw { requested: 16 }).unwrap(),
            Status::Complete
        );
    }

    #[test]
    fn test_classify_oversized_declared_length() {
        let pkt = framed_packet(CMD_HELLO, 0x0010_0000, 8);
        assert_eq!(
            classify(&pkt, ReadKind::Framed),
            Err(ProtocolError::OversizedPacket {
                declared: 0x0010_0000,
                limit: MAX_FRAMED_PACKET_LEN
            })
        );
    }

    #[test]
    fn test_expected_len_table() {
        assert_eq!(expected_len(CMD_HELLO), Some(48));
        assert_eq!(expected_len(CMD_READY), Some(8));
        assert_eq!(expected_len(CMD_MEMORY_DEBUG), Some(16));
        assert_eq!(expected_len(CMD_EXECUTE_RESP), Some(16));
        assert_eq!(expected_len(0xDEAD), None);
    }
}

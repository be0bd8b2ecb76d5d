//! Protocol constants for the Sahara diagnostic command set.
//!
//! Command ids and declared lengths follow the Sierra Wireless variant
//! of the protocol as spoken by the modem's boot loader.

// ============================================================================
// Command ids (sender noted: Target = modem, Host = us)
// ============================================================================

pub const CMD_INVALID: u32 = 0x00;
/// Target
pub const CMD_HELLO: u32 = 0x01;
/// Host
pub const CMD_HELLO_RESP: u32 = 0x02;
/// Target
pub const CMD_READ_DATA: u32 = 0x03;
/// Target
pub const CMD_END_TRANSFER_IMAGE: u32 = 0x04;
/// Host
pub const CMD_DONE: u32 = 0x05;
/// Target
pub const CMD_DONE_RESP: u32 = 0x06;
/// Host
pub const CMD_RESET: u32 = 0x07;
/// Target
pub const CMD_RESET_RESP: u32 = 0x08;
/// Target
pub const CMD_MEMORY_DEBUG: u32 = 0x09;
/// Host
pub const CMD_MEMORY_READ: u32 = 0x0A;
/// Target
pub const CMD_READY: u32 = 0x0B;
/// Host
pub const CMD_SWITCH_MODE: u32 = 0x0C;
/// Host
pub const CMD_EXECUTE: u32 = 0x0D;
/// Target
pub const CMD_EXECUTE_RESP: u32 = 0x0E;
/// Host
pub const CMD_EXECUTE_DATA: u32 = 0x0F;

// ============================================================================
// Declared packet lengths (bytes, header included)
// ============================================================================

pub const LEN_HELLO: u32 = 0x30;
pub const LEN_HELLO_RESP: u32 = 0x30;
pub const LEN_READ_DATA: u32 = 0x14;
pub const LEN_END_TRANSFER_IMAGE: u32 = 0x10;
pub const LEN_DONE: u32 = 0x08;
pub const LEN_DONE_RESP: u32 = 0x0C;
pub const LEN_RESET: u32 = 0x08;
pub const LEN_RESET_RESP: u32 = 0x08;
pub const LEN_MEMORY_DEBUG: u32 = 0x10;
pub const LEN_MEMORY_READ: u32 = 0x10;
pub const LEN_READY: u32 = 0x08;
pub const LEN_SWITCH_MODE: u32 = 0x0C;
pub const LEN_EXECUTE: u32 = 0x0C;
pub const LEN_EXECUTE_RESP: u32 = 0x10;
pub const LEN_EXECUTE_DATA: u32 = 0x0C;

// ============================================================================
// Mode values carried in CMD_SWITCH_MODE / CMD_HELLO_RESP
// ============================================================================

pub const MODE_MEMORY_DEBUG: u32 = 0x02;
pub const MODE_COMMAND: u32 = 0x03;

// ============================================================================
// Execute codes for the command-mode crash-info reads
// ============================================================================

pub const EXEC_BOOT_VERSION_READ: u32 = 0xFF01;
pub const EXEC_PRODUCT_MODEL_READ: u32 = 0xFF02;
pub const EXEC_SERIAL_NUM_READ: u32 = 0xFF03;
pub const EXEC_CRASH_INFO_READ: u32 = 0xFF04;

// ============================================================================
// Protocol versions echoed in CMD_HELLO_RESP
// ============================================================================

pub const PROTOCOL_VERSION: u32 = 2;
pub const PROTOCOL_COMPAT_VERSION: u32 = 1;

// ============================================================================
// Sizes
// ============================================================================

/// Largest single memory read we request, and the receive chunk size.
pub const MAX_MEM_READ_LEN: usize = 0x07F0;

/// Ceiling on a framed packet's declared length. The largest real packet
/// is CMD_HELLO at 48 bytes; anything past this is a desynchronized or
/// hostile peer, not a packet worth accumulating.
pub const MAX_FRAMED_PACKET_LEN: u32 = 0x1000;

/// Fixed width of the description and filename fields in a region record.
pub const MEM_REGION_NAME_SIZE: usize = 20;

const U32_SIZE: usize = 4;

/// One region record on the wire: save_pref, addr, len + two names.
pub const MEM_REGION_RECORD_SIZE: usize = (3 * U32_SIZE) + (2 * MEM_REGION_NAME_SIZE);

//! Protocol constants for the Portfolio parallel-port file server.
//!
//! These values are fixed by the Portfolio side and must match it exactly.

// ============================================================================
// Controller wiring
// ============================================================================

/// Input clock, sub-D25 pin 12.
pub const DEFAULT_PIN_INPUT_CLOCK: u32 = 2;
/// Input data, sub-D25 pin 13.
pub const DEFAULT_PIN_INPUT_DATA: u32 = 3;
/// Output clock, sub-D25 pin 3.
pub const DEFAULT_PIN_OUTPUT_CLOCK: u32 = 4;
/// Output data, sub-D25 pin 2.
pub const DEFAULT_PIN_OUTPUT_DATA: u32 = 5;

// ============================================================================
// Bit timing
// ============================================================================

/// Data settle time before the output clock edge (microseconds).
pub const DEFAULT_SETUP_US: u64 = 5;

/// Active clock hold time (microseconds).
pub const DEFAULT_HOLD_US: u64 = 20;

/// Data bits per byte frame, excluding any parity bit.
pub const DATA_BITS: usize = 8;

// ============================================================================
// Handshake and block framing
// ============================================================================

/// Sent by the server whenever it is ready for the next block.
pub const SERVER_READY: u8 = 0x5A; // 'Z'

/// Sent by the controller to ask the server for its pending block.
pub const BLOCK_REQUEST: u8 = 0x5A; // 'Z'

/// First byte of every block on the wire.
pub const BLOCK_START: u8 = 0xA5;

/// Largest block the server accepts.
pub const MAX_BLOCK_SIZE: usize = 0x7000;

// ============================================================================
// Server commands (first byte of a request block)
// ============================================================================

pub const CMD_ABORT: u8 = 0x00;
pub const CMD_RETRIEVE_FILE: u8 = 0x02;
pub const CMD_SEND_FILE: u8 = 0x03;
pub const CMD_OVERWRITE: u8 = 0x05;
pub const CMD_FILE_LIST: u8 = 0x06;
pub const CMD_SUCCESS: u8 = 0x20;

/// Trailing word of the success block that closes a retrieval.
pub const SUCCESS_TRAILER: u16 = 3;

// ============================================================================
// Server responses (first byte of a reply block)
// ============================================================================

pub const RESP_FILE_EXISTS: u8 = 0x20;
pub const RESP_FILE_NOT_FOUND: u8 = 0x21;

//! Link-level error types.

use thiserror::Error;

use crate::line::LineError;
use crate::state::LinkState;
use crate::transport::TransportError;

/// Byte or block framing violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Parity mismatch on byte 0x{value:02X}")]
    Parity { value: u8 },

    #[error("Frame of {actual} bits, expected {expected}")]
    FrameLength { expected: usize, actual: usize },

    #[error("Expected marker 0x{expected:02X}, received 0x{actual:02X}")]
    UnexpectedMarker { expected: u8, actual: u8 },

    #[error("Block length {declared} exceeds capacity {capacity}")]
    LengthExceeded { declared: usize, capacity: usize },

    #[error("Block checksum residue 0x{residue:02X}")]
    Checksum { residue: u8 },

    #[error("Peer echoed checksum 0x{actual:02X}, expected 0x{expected:02X}")]
    ChecksumEcho { expected: u8, actual: u8 },
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Session already enabled")]
    AlreadyEnabled,

    #[error("Session is disabled")]
    Disabled,

    #[error("{operation} not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: LinkState,
    },

    #[error("Block of {len} bytes exceeds maximum of {max}")]
    BlockTooLarge { len: usize, max: usize },
}

impl From<LineError> for LinkError {
    fn from(e: LineError) -> Self {
        LinkError::Transport(TransportError::Line(e))
    }
}

impl LinkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Transport(e) if e.is_timeout())
    }

    /// Whether a fresh `wait_for_server` may succeed after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinkError::Framing(_)) || self.is_timeout()
    }
}

//! Blocking line-wait capability.
//!
//! Defines the `LineWait` trait used by the bit transport to suspend until a
//! line reaches a level, so the polling strategy can be swapped without
//! touching the framer or session.

use std::time::Duration;

use thiserror::Error;

use crate::line::{Level, Line, LineDriver, LineError};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Timeout after {timeout_ms}ms waiting for {line} to go {level}")]
    Timeout {
        line: Line,
        level: Level,
        timeout_ms: u64,
    },

    #[error("Line error: {0}")]
    Line(#[from] LineError),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Suspension point of the transport.
pub trait LineWait {
    /// Poll `line` until it reads `level`. `None` waits forever.
    fn wait_for<D: LineDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        line: Line,
        level: Level,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError>;

    /// Hold the current line state for at least `duration`.
    fn delay(&mut self, duration: Duration);
}

//! Line driver abstraction.
//!
//! Defines the `LineDriver` trait that owns the four signal lines,
//! allowing different implementations (sysfs GPIO, mock, etc.).

use std::fmt;
use thiserror::Error;

/// One of the four logical signal lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    InputClock,
    InputData,
    OutputClock,
    OutputData,
}

impl Line {
    pub const ALL: [Line; 4] = [
        Line::InputClock,
        Line::InputData,
        Line::OutputClock,
        Line::OutputData,
    ];

    /// Direction the line must be configured with during a session.
    pub fn direction(&self) -> Direction {
        match self {
            Line::InputClock | Line::InputData => Direction::Input,
            Line::OutputClock | Line::OutputData => Direction::Output,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Line::InputClock => 0,
            Line::InputData => 1,
            Line::OutputClock => 2,
            Line::OutputData => 3,
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::InputClock => write!(f, "input-clock"),
            Line::InputData => write!(f, "input-data"),
            Line::OutputClock => write!(f, "output-clock"),
            Line::OutputData => write!(f, "output-data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Electrical level of a line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(&self) -> bool {
        matches!(self, Level::High)
    }

    pub fn toggled(&self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(bit: bool) -> Self {
        if bit { Level::High } else { Level::Low }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> Self {
        level.is_high()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::High => write!(f, "high"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LineError {
    #[error("Line {line} is configured as {direction}")]
    WrongDirection { line: Line, direction: Direction },

    #[error("Line {line} has not been configured")]
    Unconfigured { line: Line },

    #[error("GPIO {pin} unavailable: {message}")]
    Unavailable { pin: u32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LineError {
    /// Misuse of a line rather than a hardware fault.
    pub fn is_direction_error(&self) -> bool {
        matches!(
            self,
            LineError::WrongDirection { .. } | LineError::Unconfigured { .. }
        )
    }
}

/// Check that `line` was configured with `wanted` before touching it.
pub(crate) fn check_direction(
    line: Line,
    configured: Option<Direction>,
    wanted: Direction,
) -> Result<(), LineError> {
    match configured {
        Some(direction) if direction == wanted => Ok(()),
        Some(direction) => Err(LineError::WrongDirection { line, direction }),
        None => Err(LineError::Unconfigured { line }),
    }
}

/// Exclusive owner of the four signal lines.
///
/// This trait enables:
/// - Production implementation using Linux sysfs GPIO
/// - Mock implementation with a simulated peer for testing
pub trait LineDriver {
    /// Set a line to input or output.
    fn configure(&mut self, line: Line, direction: Direction) -> Result<(), LineError>;

    /// Sample an input line.
    fn read(&mut self, line: Line) -> Result<Level, LineError>;

    /// Drive an output line.
    fn write(&mut self, line: Line, level: Level) -> Result<(), LineError>;

    /// Hand the lines back at the end of a session.
    fn release(&mut self) -> Result<(), LineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_directions() {
        assert_eq!(Line::InputClock.direction(), Direction::Input);
        assert_eq!(Line::InputData.direction(), Direction::Input);
        assert_eq!(Line::OutputClock.direction(), Direction::Output);
        assert_eq!(Line::OutputData.direction(), Direction::Output);
    }

    #[test]
    fn test_check_direction() {
        assert!(check_direction(Line::InputData, Some(Direction::Input), Direction::Input).is_ok());
        assert!(matches!(
            check_direction(Line::InputData, Some(Direction::Output), Direction::Input),
            Err(LineError::WrongDirection { .. })
        ));
        assert!(matches!(
            check_direction(Line::OutputClock, None, Direction::Output),
            Err(LineError::Unconfigured { .. })
        ));
    }
}

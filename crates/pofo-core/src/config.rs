//! Link configuration.
//!
//! Pin numbers, signalling conventions and timing are all carried here and
//! handed to the line driver and transport at construction.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::line::{Level, Line};
use crate::protocol::constants::*;

/// Controller pin assigned to each logical line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub input_clock: u32,
    pub input_data: u32,
    pub output_clock: u32,
    pub output_data: u32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            input_clock: DEFAULT_PIN_INPUT_CLOCK,
            input_data: DEFAULT_PIN_INPUT_DATA,
            output_clock: DEFAULT_PIN_OUTPUT_CLOCK,
            output_data: DEFAULT_PIN_OUTPUT_DATA,
        }
    }
}

impl PinConfig {
    pub fn pin(&self, line: Line) -> u32 {
        match line {
            Line::InputClock => self.input_clock,
            Line::InputData => self.input_data,
            Line::OutputClock => self.output_clock,
            Line::OutputData => self.output_data,
        }
    }
}

/// Clock edge on which data is valid. The clock idles at the opposite level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockEdge {
    Rising,
    #[default]
    Falling,
}

impl ClockEdge {
    pub fn idle_level(&self) -> Level {
        match self {
            ClockEdge::Rising => Level::Low,
            ClockEdge::Falling => Level::High,
        }
    }

    pub fn active_level(&self) -> Level {
        self.idle_level().toggled()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Signalling conventions shared with the Portfolio.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub active_edge: ClockEdge,
    pub bit_order: BitOrder,
    pub parity: Parity,
}

/// Bit timing and poll bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Output data settle time before the clock edge.
    pub setup_us: u64,
    /// Time the output clock is held active.
    pub hold_us: u64,
    /// Bound on a single received bit. `None` polls forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_timeout_ms: Option<u64>,
    /// Bound on the whole server handshake. `None` polls forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_timeout_ms: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            setup_us: DEFAULT_SETUP_US,
            hold_us: DEFAULT_HOLD_US,
            bit_timeout_ms: None,
            sync_timeout_ms: None,
        }
    }
}

impl TimingConfig {
    pub fn setup(&self) -> Duration {
        Duration::from_micros(self.setup_us)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_micros(self.hold_us)
    }

    pub fn bit_timeout(&self) -> Option<Duration> {
        self.bit_timeout_ms.map(Duration::from_millis)
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration for a link session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Largest block exchanged in either direction.
    pub max_block_size: usize,
    pub pins: PinConfig,
    pub signal: SignalConfig,
    pub timing: TimingConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_block_size: MAX_BLOCK_SIZE,
            pins: PinConfig::default(),
            signal: SignalConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LinkConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Block size announced to the server in request headers.
    pub fn wire_block_size(&self) -> u16 {
        self.max_block_size.min(u16::MAX as usize) as u16
    }
}

//! Clock-synchronised single-bit transfer.
//!
//! Output: data is placed on output-data, then output-clock is driven from
//! idle to active for the hold time and returned to idle. The peer samples
//! on the active edge.
//!
//! Input: the input clock must first be seen at its idle level and then at
//! its active level; input-data is sampled on that transition. A clock
//! already held active when the call starts is therefore not an edge.

use std::time::{Duration, Instant};

use tracing::trace;

use super::traits::{LineWait, TransportError};
use super::wait::SpinWait;
use crate::config::{ClockEdge, LinkConfig};
use crate::line::{Level, Line, LineDriver};

/// Clock convention and hold times for one direction pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub edge: ClockEdge,
    pub setup: Duration,
    pub hold: Duration,
}

impl BitTiming {
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            edge: config.signal.active_edge,
            setup: config.timing.setup(),
            hold: config.timing.hold(),
        }
    }
}

impl Default for BitTiming {
    fn default() -> Self {
        Self::from_config(&LinkConfig::default())
    }
}

pub struct BitTransport<D, W = SpinWait> {
    driver: D,
    waiter: W,
    timing: BitTiming,
}

impl<D: LineDriver, W: LineWait> BitTransport<D, W> {
    pub fn new(driver: D, waiter: W, timing: BitTiming) -> Self {
        Self {
            driver,
            waiter,
            timing,
        }
    }

    pub fn timing(&self) -> &BitTiming {
        &self.timing
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Drive both outputs to their resting levels: clock idle, data low.
    pub fn idle(&mut self) -> Result<(), TransportError> {
        self.driver.write(Line::OutputData, Level::Low)?;
        self.driver
            .write(Line::OutputClock, self.timing.edge.idle_level())?;
        Ok(())
    }

    pub fn send_bit(&mut self, bit: Level) -> Result<(), TransportError> {
        self.driver.write(Line::OutputData, bit)?;
        self.waiter.delay(self.timing.setup);
        self.driver
            .write(Line::OutputClock, self.timing.edge.active_level())?;
        self.waiter.delay(self.timing.hold);
        self.driver
            .write(Line::OutputClock, self.timing.edge.idle_level())?;
        trace!(bit = %bit, "Sent bit");
        Ok(())
    }

    /// Block until the next active clock edge and sample the data line.
    pub fn receive_bit(&mut self, timeout: Option<Duration>) -> Result<Level, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let idle = self.timing.edge.idle_level();
        let active = self.timing.edge.active_level();

        self.wait_clock(idle, deadline, timeout)?;
        self.wait_clock(active, deadline, timeout)?;

        let bit = self.driver.read(Line::InputData)?;
        trace!(bit = %bit, "Received bit");
        Ok(bit)
    }

    fn wait_clock(
        &mut self,
        level: Level,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        self.waiter
            .wait_for(&mut self.driver, Line::InputClock, level, remaining)
            .map_err(|e| match e {
                // Report the bound the caller asked for, not what was left of it.
                TransportError::Timeout { line, level, .. } => TransportError::Timeout {
                    line,
                    level,
                    timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
                },
                other => other,
            })
    }
}

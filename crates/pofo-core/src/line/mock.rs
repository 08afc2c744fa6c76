//! Mock line driver for testing.
//!
//! Output writes are logged and the output-data level is sampled on every
//! idle→active output-clock transition. Completed frames are decoded and
//! handed to a [`PeerModel`]; the bytes it answers with are clocked back on
//! the input lines, one bit per input-clock pulse.

use std::collections::VecDeque;

use super::peer::{PeerModel, SilentPeer};
use super::traits::{Direction, Level, Line, LineDriver, LineError, check_direction};
use crate::config::{ClockEdge, LinkConfig};
use crate::framer::FrameFormat;

/// Where the simulated peer's clock is within the current bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputPhase {
    /// Clock at idle, not yet sampled by the controller.
    Released,
    /// Idle level has been observed.
    Armed,
    /// Clock active, data holds the front bit.
    Presenting,
}

/// Mock line driver with a simulated peer.
pub struct MockLines<P: PeerModel = SilentPeer> {
    format: FrameFormat,
    edge: ClockEdge,
    directions: [Option<Direction>; 4],
    levels: [Level; 4],
    /// Every output write, in order.
    writes: Vec<(Line, Level)>,
    /// Output data sampled on each active clock edge.
    sent_bits: Vec<Level>,
    /// Bits of the frame currently being decoded.
    frame: Vec<Level>,
    sent_bytes: Vec<u8>,
    framing_errors: usize,
    /// Bits waiting to be clocked to the controller.
    peer_bits: VecDeque<Level>,
    phase: InputPhase,
    held_clock: Option<Level>,
    released: bool,
    peer: P,
}

impl MockLines<SilentPeer> {
    pub fn new(format: FrameFormat, edge: ClockEdge) -> Self {
        Self::with_peer(format, edge, SilentPeer)
    }
}

impl<P: PeerModel> MockLines<P> {
    pub fn with_peer(format: FrameFormat, edge: ClockEdge, mut peer: P) -> Self {
        let greeting = peer.greeting();
        let mut levels = [Level::Low; 4];
        levels[Line::InputClock.index()] = edge.idle_level();
        levels[Line::OutputClock.index()] = edge.idle_level();
        let mut mock = Self {
            format,
            edge,
            directions: [None; 4],
            levels,
            writes: Vec::new(),
            sent_bits: Vec::new(),
            frame: Vec::new(),
            sent_bytes: Vec::new(),
            framing_errors: 0,
            peer_bits: VecDeque::new(),
            phase: InputPhase::Released,
            held_clock: None,
            released: false,
            peer,
        };
        mock.queue_peer_bytes(&greeting);
        mock
    }

    /// Build a mock matching the signalling in `config`.
    pub fn from_config(config: &LinkConfig, peer: P) -> Self {
        Self::with_peer(
            FrameFormat::from_config(config),
            config.signal.active_edge,
            peer,
        )
    }

    /// Queue bytes for the peer to clock in, framed with the mock's format.
    pub fn queue_peer_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.peer_bits.extend(self.format.encode(byte));
        }
    }

    /// Queue raw bits, bypassing framing.
    pub fn queue_peer_bits(&mut self, bits: &[Level]) {
        self.peer_bits.extend(bits.iter().copied());
    }

    /// Pin the input clock at `level` until called again with `None`.
    pub fn hold_input_clock(&mut self, level: Option<Level>) {
        self.held_clock = level;
    }

    pub fn pending_peer_bits(&self) -> usize {
        self.peer_bits.len()
    }

    pub fn writes(&self) -> &[(Line, Level)] {
        &self.writes
    }

    pub fn sent_bits(&self) -> &[Level] {
        &self.sent_bits
    }

    pub fn sent_bytes(&self) -> &[u8] {
        &self.sent_bytes
    }

    pub fn framing_errors(&self) -> usize {
        self.framing_errors
    }

    /// Clear captured writes, bits and bytes.
    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.sent_bits.clear();
        self.sent_bytes.clear();
    }

    /// Last level driven on (or presented to) `line`.
    pub fn level(&self, line: Line) -> Level {
        self.levels[line.index()]
    }

    pub fn direction(&self, line: Line) -> Option<Direction> {
        self.directions[line.index()]
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    pub fn peer_mut(&mut self) -> &mut P {
        &mut self.peer
    }

    fn on_active_edge(&mut self) {
        let bit = self.levels[Line::OutputData.index()];
        self.sent_bits.push(bit);
        self.frame.push(bit);
        if self.frame.len() < self.format.bits_per_frame() {
            return;
        }
        let frame = std::mem::take(&mut self.frame);
        match self.format.decode(&frame) {
            Ok(byte) => {
                self.sent_bytes.push(byte);
                let reply = self.peer.on_byte(byte);
                self.queue_peer_bytes(&reply);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Mock peer dropped frame");
                self.framing_errors += 1;
            }
        }
    }

    fn read_clock(&mut self) -> Level {
        if let Some(level) = self.held_clock {
            return level;
        }
        let idle = self.edge.idle_level();
        let active = self.edge.active_level();
        match self.phase {
            InputPhase::Released => {
                self.phase = InputPhase::Armed;
                idle
            }
            InputPhase::Armed if !self.peer_bits.is_empty() => {
                self.phase = InputPhase::Presenting;
                active
            }
            InputPhase::Armed => idle,
            InputPhase::Presenting => {
                self.peer_bits.pop_front();
                self.phase = InputPhase::Armed;
                idle
            }
        }
    }

    fn read_data(&self) -> Level {
        match self.phase {
            InputPhase::Presenting => self.peer_bits.front().copied().unwrap_or_default(),
            _ => Level::Low,
        }
    }
}

impl<P: PeerModel> LineDriver for MockLines<P> {
    fn configure(&mut self, line: Line, direction: Direction) -> Result<(), LineError> {
        self.directions[line.index()] = Some(direction);
        self.released = false;
        Ok(())
    }

    fn read(&mut self, line: Line) -> Result<Level, LineError> {
        check_direction(line, self.directions[line.index()], Direction::Input)?;
        let level = match line {
            Line::InputClock => self.read_clock(),
            _ => self.read_data(),
        };
        self.levels[line.index()] = level;
        Ok(level)
    }

    fn write(&mut self, line: Line, level: Level) -> Result<(), LineError> {
        check_direction(line, self.directions[line.index()], Direction::Output)?;
        let previous = self.levels[line.index()];
        self.levels[line.index()] = level;
        self.writes.push((line, level));
        if line == Line::OutputClock
            && previous == self.edge.idle_level()
            && level == self.edge.active_level()
        {
            self.on_active_edge();
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), LineError> {
        self.released = true;
        Ok(())
    }
}

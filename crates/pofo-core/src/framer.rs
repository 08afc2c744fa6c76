//! Byte framing over the bit transport.
//!
//! A frame is the eight data bits in the configured order followed by an
//! optional parity bit. Bit order and parity are identical in both
//! directions.

use std::time::Duration;

use tracing::trace;

use crate::config::{BitOrder, LinkConfig, Parity};
use crate::error::{FramingError, LinkError};
use crate::line::{Level, LineDriver};
use crate::protocol::constants::DATA_BITS;
use crate::transport::{BitTransport, LineWait, SpinWait};

/// Layout of one byte on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub bit_order: BitOrder,
    pub parity: Parity,
}

impl FrameFormat {
    pub const fn new(bit_order: BitOrder, parity: Parity) -> Self {
        Self { bit_order, parity }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.signal.bit_order, config.signal.parity)
    }

    pub fn bits_per_frame(&self) -> usize {
        match self.parity {
            Parity::None => DATA_BITS,
            Parity::Even | Parity::Odd => DATA_BITS + 1,
        }
    }

    /// Mask of the data bit transferred at `position`.
    fn mask(&self, position: usize) -> u8 {
        match self.bit_order {
            BitOrder::MsbFirst => 0x80 >> position,
            BitOrder::LsbFirst => 0x01 << position,
        }
    }

    fn parity_bit(&self, value: u8) -> Option<Level> {
        let odd_ones = value.count_ones() % 2 == 1;
        match self.parity {
            Parity::None => None,
            Parity::Even => Some(Level::from(odd_ones)),
            Parity::Odd => Some(Level::from(!odd_ones)),
        }
    }

    /// Bits of `value` in transmission order.
    pub fn encode(&self, value: u8) -> impl Iterator<Item = Level> + use<> {
        let format = *self;
        (0..DATA_BITS)
            .map(move |position| Level::from(value & format.mask(position) != 0))
            .chain(format.parity_bit(value))
    }

    /// Reassemble a complete frame.
    pub fn decode(&self, bits: &[Level]) -> Result<u8, FramingError> {
        if bits.len() != self.bits_per_frame() {
            return Err(FramingError::FrameLength {
                expected: self.bits_per_frame(),
                actual: bits.len(),
            });
        }
        let value = bits[..DATA_BITS]
            .iter()
            .enumerate()
            .fold(0u8, |acc, (position, bit)| {
                if bit.is_high() { acc | self.mask(position) } else { acc }
            });
        self.check_parity(value, bits.get(DATA_BITS).copied())?;
        Ok(value)
    }

    fn check_parity(&self, value: u8, received: Option<Level>) -> Result<(), FramingError> {
        match (self.parity_bit(value), received) {
            (Some(expected), Some(actual)) if expected != actual => {
                Err(FramingError::Parity { value })
            }
            _ => Ok(()),
        }
    }
}

/// `ReadByte`/`SendByte` on top of a bit transport.
pub struct ByteFramer<D, W = SpinWait> {
    transport: BitTransport<D, W>,
    format: FrameFormat,
}

impl<D: LineDriver, W: LineWait> ByteFramer<D, W> {
    pub fn new(transport: BitTransport<D, W>, format: FrameFormat) -> Self {
        Self { transport, format }
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn transport(&self) -> &BitTransport<D, W> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut BitTransport<D, W> {
        &mut self.transport
    }

    pub fn into_transport(self) -> BitTransport<D, W> {
        self.transport
    }

    pub fn send_byte(&mut self, value: u8) -> Result<(), LinkError> {
        for bit in self.format.encode(value) {
            self.transport.send_bit(bit)?;
        }
        trace!(byte = %format!("0x{:02X}", value), "Sent byte");
        Ok(())
    }

    /// Read one frame. `timeout` bounds each bit.
    pub fn read_byte(&mut self, timeout: Option<Duration>) -> Result<u8, LinkError> {
        let mut value = 0u8;
        for position in 0..DATA_BITS {
            if self.transport.receive_bit(timeout)?.is_high() {
                value |= self.format.mask(position);
            }
        }
        if self.format.parity != Parity::None {
            let parity = self.transport.receive_bit(timeout)?;
            self.format.check_parity(value, Some(parity))?;
        }
        trace!(byte = %format!("0x{:02X}", value), "Received byte");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClockEdge;
    use crate::line::{EchoPeer, Line, MockLines};
    use crate::transport::BitTiming;

    fn levels(bits: &str) -> Vec<Level> {
        bits.chars().map(|c| Level::from(c == '1')).collect()
    }

    fn loopback(format: FrameFormat) -> ByteFramer<MockLines<EchoPeer>> {
        let mut mock = MockLines::with_peer(format, ClockEdge::Falling, EchoPeer);
        for line in Line::ALL {
            mock.configure(line, line.direction()).unwrap();
        }
        let timing = BitTiming {
            edge: ClockEdge::Falling,
            setup: Duration::ZERO,
            hold: Duration::ZERO,
        };
        ByteFramer::new(BitTransport::new(mock, SpinWait, timing), format)
    }

    #[test]
    fn test_msb_first_encoding() {
        let format = FrameFormat::default();
        let bits: Vec<_> = format.encode(0xA5).collect();
        assert_eq!(bits, levels("10100101"));
    }

    #[test]
    fn test_lsb_first_encoding() {
        let format = FrameFormat::new(BitOrder::LsbFirst, Parity::None);
        let bits: Vec<_> = format.encode(0x01).collect();
        assert_eq!(bits, levels("10000000"));
    }

    #[test]
    fn test_parity_bits() {
        let even = FrameFormat::new(BitOrder::MsbFirst, Parity::Even);
        let odd = FrameFormat::new(BitOrder::MsbFirst, Parity::Odd);
        // 0x07 has three ones.
        assert_eq!(even.encode(0x07).last(), Some(Level::High));
        assert_eq!(odd.encode(0x07).last(), Some(Level::Low));
        assert_eq!(even.encode(0x03).last(), Some(Level::Low));
        assert_eq!(even.encode(0x03).count(), 9);
    }

    #[test]
    fn test_decode_detects_parity_error() {
        let format = FrameFormat::new(BitOrder::MsbFirst, Parity::Even);
        let mut bits: Vec<_> = format.encode(0x5A).collect();
        assert_eq!(format.decode(&bits), Ok(0x5A));
        let last = bits.len() - 1;
        bits[last] = bits[last].toggled();
        assert_eq!(format.decode(&bits), Err(FramingError::Parity { value: 0x5A }));
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let format = FrameFormat::default();
        assert_eq!(
            format.decode(&levels("1010")),
            Err(FramingError::FrameLength {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_loopback_all_byte_values() {
        for format in [
            FrameFormat::default(),
            FrameFormat::new(BitOrder::LsbFirst, Parity::Odd),
        ] {
            let mut framer = loopback(format);
            framer.transport_mut().idle().unwrap();
            for value in 0..=255u8 {
                framer.send_byte(value).unwrap();
                let echoed = framer.read_byte(Some(Duration::from_millis(50))).unwrap();
                assert_eq!(echoed, value);
            }
        }
    }

    #[test]
    fn test_read_byte_parity_error_surfaces() {
        let format = FrameFormat::new(BitOrder::MsbFirst, Parity::Odd);
        let mut framer = loopback(format);
        let mut bits: Vec<_> = format.encode(0x10).collect();
        let last = bits.len() - 1;
        bits[last] = bits[last].toggled();
        framer.transport_mut().driver_mut().queue_peer_bits(&bits);

        let err = framer.read_byte(Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Framing(FramingError::Parity { value: 0x10 })
        ));
    }
}

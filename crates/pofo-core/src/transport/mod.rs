//! Bit transport layer module.

pub mod bit;
pub mod traits;
pub mod wait;

pub use bit::{BitTiming, BitTransport};
pub use traits::{LineWait, TransportError};
pub use wait::{SpinWait, YieldWait};

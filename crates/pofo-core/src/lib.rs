//! Pofo-Core: Atari Portfolio parallel link in Rust.
//!
//! This crate drives the Portfolio's file server over four general-purpose
//! lines (two clocks, two data) with no UART behind them: every bit is
//! clocked and sampled in software.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Line**: Line driver abstraction (sysfs GPIO, mock with simulated peers)
//! - **Transport**: Clock-synchronised bit transfer and wait strategies
//! - **Framer**: Bytes as bit frames, with optional parity
//! - **State**: Session lifecycle states and counters
//! - **Session**: Enable/disable, server handshake, block transfer
//! - **Files**: Listing, upload and download on top of blocks
//! - **Protocol**: Constants, block checksum, request/reply layouts, DOS timestamps
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use pofo_core::{LinkConfig, LinkSession, SysfsLines};
//!
//! let config = LinkConfig::default();
//! let lines = SysfsLines::new(&config.pins);
//! let mut session = LinkSession::new(lines, config);
//!
//! session.enable()?;
//! for name in session.list_files("C:\\*.*")? {
//!     println!("{}", name);
//! }
//! session.disable()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod files;
pub mod framer;
pub mod line;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::{BitOrder, ClockEdge, LinkConfig, Parity, PinConfig, SignalConfig, TimingConfig};
pub use error::{FramingError, LinkError};
pub use events::{
    BlockDirection, LinkEvent, LinkObserver, NullObserver, RecordingObserver, TracingObserver,
};
pub use files::{FileError, RetrievedFile, SendOutcome};
pub use framer::{ByteFramer, FrameFormat};
pub use line::{
    Direction, EchoPeer, FileServer, FileServerPeer, Level, Line, LineDriver, LineError,
    MockLines, SysfsLines,
};
pub use session::LinkSession;
pub use state::{LinkState, LinkStats};
pub use transport::{BitTiming, BitTransport, LineWait, SpinWait, TransportError, YieldWait};

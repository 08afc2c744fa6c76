//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow a link session
//! without tight coupling to the core logic.

use std::fmt;
use std::sync::Mutex;

use crate::state::LinkState;

/// Events emitted by a link session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Session state changed.
    StateChanged { from: LinkState, to: LinkState },
    /// Server signalled ready after `discarded` stray bytes.
    ServerReady { discarded: usize },
    /// A block crossed the link.
    Block {
        direction: BlockDirection,
        length: usize,
    },
    /// Progress of a file transfer.
    Progress {
        operation: String,
        current: u64,
        total: u64,
    },
    /// A file operation failed on the link.
    Error { message: String },
}

/// Block direction, seen from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDirection {
    Tx,
    Rx,
}

impl fmt::Display for BlockDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockDirection::Tx => write!(f, "TX"),
            BlockDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving link events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait LinkObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &LinkEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl LinkObserver for NullObserver {
    fn on_event(&self, _event: &LinkEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl LinkObserver for TracingObserver {
    fn on_event(&self, event: &LinkEvent) {
        match event {
            LinkEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Link state changed");
            }
            LinkEvent::ServerReady { discarded } => {
                tracing::debug!(discarded = discarded, "Server ready");
            }
            LinkEvent::Block { direction, length } => {
                tracing::trace!(dir = %direction, len = length, "Block");
            }
            LinkEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    100
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            LinkEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
        }
    }
}

/// Observer that keeps every event, for inspection in tests.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LinkEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl LinkObserver for RecordingObserver {
    fn on_event(&self, event: &LinkEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

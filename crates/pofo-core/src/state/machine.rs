//! Session state machine.

use std::fmt;

/// Lifecycle state of a link session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Lines released; nothing may be transferred.
    #[default]
    Disabled,
    /// Lines configured and idle.
    Idle,
    /// Waiting for the server's ready byte.
    Syncing,
    /// Server is ready for exactly one block operation.
    Transferring,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disabled => write!(f, "DISABLED"),
            LinkState::Idle => write!(f, "IDLE"),
            LinkState::Syncing => write!(f, "SYNCING"),
            LinkState::Transferring => write!(f, "TRANSFERRING"),
        }
    }
}

impl LinkState {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, LinkState::Disabled)
    }
}

/// Counters kept across the life of a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    /// Successful server handshakes.
    pub transactions: u64,
    pub blocks_sent: u64,
    pub blocks_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// State machine context holding all runtime state.
#[derive(Debug, Default)]
pub struct StateMachineContext {
    pub state: LinkState,
    pub stats: LinkStats,
}

impl StateMachineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state, returning the one left.
    pub fn goto_state(&mut self, new_state: LinkState) -> LinkState {
        if self.state != new_state {
            tracing::debug!(from = %self.state, to = %new_state, "State transition");
        }
        std::mem::replace(&mut self.state, new_state)
    }

    pub fn record_sent(&mut self, len: usize) {
        self.stats.blocks_sent += 1;
        self.stats.bytes_sent += len as u64;
    }

    pub fn record_received(&mut self, len: usize) {
        self.stats.blocks_received += 1;
        self.stats.bytes_received += len as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let ctx = StateMachineContext::new();
        assert_eq!(ctx.state, LinkState::Disabled);
        assert!(!ctx.state.is_enabled());
        assert_eq!(ctx.stats, LinkStats::default());
    }

    #[test]
    fn test_goto_returns_previous() {
        let mut ctx = StateMachineContext::new();
        assert_eq!(ctx.goto_state(LinkState::Idle), LinkState::Disabled);
        assert_eq!(ctx.goto_state(LinkState::Syncing), LinkState::Idle);
        assert!(ctx.state.is_enabled());
    }

    #[test]
    fn test_record_counters() {
        let mut ctx = StateMachineContext::new();
        ctx.record_sent(10);
        ctx.record_received(3);
        ctx.record_received(4);
        assert_eq!(ctx.stats.blocks_sent, 1);
        assert_eq!(ctx.stats.bytes_received, 7);
    }
}

//! Link session - lifecycle, server handshake and block transfer.
//!
//! A session owns the byte framer (and through it the line driver) and
//! walks `Disabled → Idle → Syncing → Transferring → Idle … → Disabled`.
//! Every block operation must be preceded by its own `wait_for_server`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::config::LinkConfig;
use crate::error::{FramingError, LinkError};
use crate::events::{BlockDirection, LinkEvent, LinkObserver, TracingObserver};
use crate::framer::{ByteFramer, FrameFormat};
use crate::line::{Line, LineDriver};
use crate::protocol::block;
use crate::protocol::constants::{BLOCK_REQUEST, BLOCK_START, SERVER_READY};
use crate::state::{LinkState, LinkStats, StateMachineContext};
use crate::transport::{BitTiming, BitTransport, LineWait, SpinWait, TransportError};

/// Link session over a line driver.
pub struct LinkSession<D, W = SpinWait, O = TracingObserver> {
    framer: ByteFramer<D, W>,
    config: LinkConfig,
    observer: Arc<O>,
    machine: StateMachineContext,
}

impl<D: LineDriver> LinkSession<D> {
    /// Create a session with busy polling and the default tracing observer.
    pub fn new(driver: D, config: LinkConfig) -> Self {
        Self::with_parts(driver, SpinWait, config, Arc::new(TracingObserver))
    }
}

impl<D: LineDriver, W: LineWait, O: LinkObserver> LinkSession<D, W, O> {
    /// Create a session with a custom wait strategy and observer.
    pub fn with_parts(driver: D, waiter: W, config: LinkConfig, observer: Arc<O>) -> Self {
        let transport = BitTransport::new(driver, waiter, BitTiming::from_config(&config));
        let framer = ByteFramer::new(transport, FrameFormat::from_config(&config));
        Self {
            framer,
            config,
            observer,
            machine: StateMachineContext::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.machine.state
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> LinkStats {
        self.machine.stats
    }

    pub fn observer(&self) -> &Arc<O> {
        &self.observer
    }

    pub fn driver(&self) -> &D {
        self.framer.transport().driver()
    }

    pub fn driver_mut(&mut self) -> &mut D {
        self.framer.transport_mut().driver_mut()
    }

    pub fn into_driver(self) -> D {
        self.framer.into_transport().into_driver()
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        self.observer.on_event(&event);
    }

    fn transition(&mut self, to: LinkState) -> LinkState {
        let from = self.machine.goto_state(to);
        if from != to {
            self.emit(LinkEvent::StateChanged { from, to });
        }
        from
    }

    /// Configure the four lines and park the outputs at idle.
    ///
    /// If any line cannot be set up, the lines are released again and the
    /// session stays `Disabled`.
    #[instrument(skip(self))]
    pub fn enable(&mut self) -> Result<(), LinkError> {
        if self.state().is_enabled() {
            return Err(LinkError::AlreadyEnabled);
        }
        if let Err(e) = self.configure_lines() {
            if let Err(release) = self.framer.transport_mut().driver_mut().release() {
                warn!(error = %release, "Failed to release lines after enable failure");
            }
            return Err(e);
        }
        self.transition(LinkState::Idle);
        info!(
            edge = ?self.config.signal.active_edge,
            order = ?self.config.signal.bit_order,
            parity = ?self.config.signal.parity,
            "Link enabled"
        );
        Ok(())
    }

    fn configure_lines(&mut self) -> Result<(), LinkError> {
        let driver = self.framer.transport_mut().driver_mut();
        for line in Line::ALL {
            driver.configure(line, line.direction())?;
        }
        self.framer.transport_mut().idle()?;
        Ok(())
    }

    /// Park the outputs and release the lines. A no-op when already disabled.
    ///
    /// The session ends up `Disabled` even if parking or releasing fails.
    #[instrument(skip(self))]
    pub fn disable(&mut self) -> Result<(), LinkError> {
        if !self.state().is_enabled() {
            return Ok(());
        }
        let parked = self.framer.transport_mut().idle();
        let released = self.framer.transport_mut().driver_mut().release();
        self.transition(LinkState::Disabled);
        info!("Link disabled");
        parked?;
        released?;
        Ok(())
    }

    /// Block until the server sends its ready byte.
    ///
    /// Bytes other than the ready byte, and frames with bad parity, are
    /// discarded. A bit timeout only restarts the frame; the wait as a whole
    /// is bounded by `sync_timeout_ms`. On failure the session returns to the
    /// state it was in.
    #[instrument(skip(self))]
    pub fn wait_for_server(&mut self) -> Result<(), LinkError> {
        let previous = match self.state() {
            LinkState::Disabled => return Err(LinkError::Disabled),
            state @ (LinkState::Idle | LinkState::Transferring) => state,
            state => {
                return Err(LinkError::InvalidState {
                    operation: "wait_for_server",
                    state,
                });
            }
        };

        self.transition(LinkState::Syncing);
        match self.await_ready() {
            Ok(discarded) => {
                self.transition(LinkState::Transferring);
                self.machine.stats.transactions += 1;
                self.emit(LinkEvent::ServerReady { discarded });
                Ok(())
            }
            Err(e) => {
                self.transition(previous);
                Err(e)
            }
        }
    }

    fn await_ready(&mut self) -> Result<usize, LinkError> {
        self.framer.transport_mut().idle()?;
        let sync_timeout = self.config.timing.sync_timeout();
        let deadline = sync_timeout.map(|t| Instant::now() + t);
        let mut discarded = 0usize;

        loop {
            let timeout = self.bounded_timeout(deadline);
            match self.framer.read_byte(timeout) {
                Ok(SERVER_READY) => {
                    debug!(discarded, "Server ready");
                    return Ok(discarded);
                }
                Ok(other) => {
                    debug!(byte = %format!("0x{:02X}", other), "Discarding byte while syncing");
                    discarded += 1;
                }
                Err(LinkError::Framing(FramingError::Parity { value })) => {
                    debug!(byte = %format!("0x{:02X}", value), "Discarding bad frame while syncing");
                    discarded += 1;
                }
                Err(LinkError::Transport(TransportError::Timeout { line, level, .. })) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(TransportError::Timeout {
                            line,
                            level,
                            timeout_ms: sync_timeout.map_or(0, |t| t.as_millis() as u64),
                        }
                        .into());
                    }
                    // A bit timed out but the handshake bound has not: start a fresh frame.
                    debug!(?line, "Bit timed out while syncing, still waiting");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Per-bit bound: the configured bit timeout, cut short by `deadline`.
    fn bounded_timeout(&self, deadline: Option<Instant>) -> Option<Duration> {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        match (self.config.timing.bit_timeout(), remaining) {
            (Some(bit), Some(remaining)) => Some(bit.min(remaining)),
            (bit, remaining) => bit.or(remaining),
        }
    }

    /// Retry the server handshake up to `attempts` times.
    ///
    /// Timeouts and framing errors are retried; anything else is returned
    /// at once.
    #[instrument(skip(self))]
    pub fn sync(&mut self, attempts: usize) -> Result<(), LinkError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.wait_for_server() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && attempt < attempts => {
                    warn!(attempt, error = %e, "Server handshake failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn require_transferring(&self, operation: &'static str) -> Result<(), LinkError> {
        match self.state() {
            LinkState::Transferring => Ok(()),
            LinkState::Disabled => Err(LinkError::Disabled),
            state => Err(LinkError::InvalidState { operation, state }),
        }
    }

    /// Send one byte. The server must be ready.
    pub fn send_byte(&mut self, value: u8) -> Result<(), LinkError> {
        self.require_transferring("send_byte")?;
        self.framer.send_byte(value)
    }

    /// Read one byte, bounded per bit by the configured bit timeout.
    pub fn read_byte(&mut self) -> Result<u8, LinkError> {
        self.require_transferring("read_byte")?;
        self.framer.read_byte(self.config.timing.bit_timeout())
    }

    /// Send one block and check the server's checksum echo.
    ///
    /// The session returns to `Idle` whether or not the block succeeds.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn send_block(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        self.require_transferring("send_block")?;
        let max = self.config.max_block_size.min(u16::MAX as usize);
        if payload.len() > max {
            return Err(LinkError::BlockTooLarge {
                len: payload.len(),
                max,
            });
        }

        let result = self.transmit_block(payload);
        self.transition(LinkState::Idle);
        result?;

        self.machine.record_sent(payload.len());
        self.emit(LinkEvent::Block {
            direction: BlockDirection::Tx,
            length: payload.len(),
        });
        Ok(())
    }

    fn transmit_block(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let checksum = block::checksum(payload);
        self.framer.send_byte(BLOCK_START)?;
        for byte in (payload.len() as u16).to_le_bytes() {
            self.framer.send_byte(byte)?;
        }
        for &byte in payload {
            self.framer.send_byte(byte)?;
        }
        self.framer.send_byte(checksum)?;

        let echo = self.framer.read_byte(self.config.timing.bit_timeout())?;
        if echo != checksum {
            return Err(FramingError::ChecksumEcho {
                expected: checksum,
                actual: echo,
            }
            .into());
        }
        Ok(())
    }

    /// Request and receive one block of at most `max_block_size` bytes.
    pub fn retrieve_block(&mut self) -> Result<Vec<u8>, LinkError> {
        self.retrieve_block_with_capacity(self.config.max_block_size)
    }

    /// Request and receive one block of at most `capacity` bytes.
    ///
    /// The checksum is echoed to the server only if it verifies. The session
    /// returns to `Idle` whether or not the block succeeds.
    #[instrument(skip(self))]
    pub fn retrieve_block_with_capacity(&mut self, capacity: usize) -> Result<Vec<u8>, LinkError> {
        self.require_transferring("retrieve_block")?;
        let result = self.receive_block(capacity);
        self.transition(LinkState::Idle);
        let payload = result?;

        self.machine.record_received(payload.len());
        self.emit(LinkEvent::Block {
            direction: BlockDirection::Rx,
            length: payload.len(),
        });
        Ok(payload)
    }

    fn receive_block(&mut self, capacity: usize) -> Result<Vec<u8>, LinkError> {
        let timeout = self.config.timing.bit_timeout();
        self.framer.send_byte(BLOCK_REQUEST)?;

        let marker = self.framer.read_byte(timeout)?;
        if marker != BLOCK_START {
            return Err(FramingError::UnexpectedMarker {
                expected: BLOCK_START,
                actual: marker,
            }
            .into());
        }

        let len = u16::from_le_bytes([
            self.framer.read_byte(timeout)?,
            self.framer.read_byte(timeout)?,
        ]) as usize;
        if len > capacity {
            return Err(FramingError::LengthExceeded {
                declared: len,
                capacity,
            }
            .into());
        }

        let mut payload = Vec::with_capacity(len);
        for _ in 0..len {
            payload.push(self.framer.read_byte(timeout)?);
        }
        let checksum = self.framer.read_byte(timeout)?;
        let residue = block::residue(&payload, checksum);
        if residue != 0 {
            return Err(FramingError::Checksum { residue }.into());
        }

        self.framer.send_byte(checksum)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::line::{
        BlockPeer, Direction, Level, LineError, Mailbox, MockLines, PeerModel, SilentPeer,
    };

    fn fast_config() -> LinkConfig {
        let mut config = LinkConfig::default();
        config.timing.setup_us = 0;
        config.timing.hold_us = 0;
        config.timing.bit_timeout_ms = Some(20);
        config.timing.sync_timeout_ms = Some(20);
        config
    }

    fn session<P: PeerModel>(
        peer: P,
    ) -> LinkSession<MockLines<P>, SpinWait, RecordingObserver> {
        let config = fast_config();
        let mock = MockLines::from_config(&config, peer);
        LinkSession::with_parts(mock, SpinWait, config, Arc::new(RecordingObserver::new()))
    }

    /// Mock lines whose server stays quiet for a while, with an optional
    /// line that refuses to be configured.
    struct SlowLines<P: PeerModel> {
        inner: MockLines<P>,
        quiet_until: Instant,
        idle: Level,
        broken: Option<Line>,
    }

    impl<P: PeerModel> SlowLines<P> {
        fn new(config: &LinkConfig, peer: P, quiet: Duration) -> Self {
            Self {
                inner: MockLines::from_config(config, peer),
                quiet_until: Instant::now() + quiet,
                idle: config.signal.active_edge.idle_level(),
                broken: None,
            }
        }
    }

    impl<P: PeerModel> LineDriver for SlowLines<P> {
        fn configure(&mut self, line: Line, direction: Direction) -> Result<(), LineError> {
            if self.broken == Some(line) {
                return Err(LineError::Unavailable {
                    pin: 0,
                    message: "busy".to_string(),
                });
            }
            self.inner.configure(line, direction)
        }

        fn read(&mut self, line: Line) -> Result<Level, LineError> {
            if line == Line::InputClock && Instant::now() < self.quiet_until {
                return Ok(self.idle);
            }
            self.inner.read(line)
        }

        fn write(&mut self, line: Line, level: Level) -> Result<(), LineError> {
            self.inner.write(line, level)
        }

        fn release(&mut self) -> Result<(), LineError> {
            self.inner.release()
        }
    }

    fn slow_session(
        config: LinkConfig,
        quiet: Duration,
    ) -> LinkSession<SlowLines<SilentPeer>, SpinWait, RecordingObserver> {
        let mut lines = SlowLines::new(&config, SilentPeer, quiet);
        lines.inner.queue_peer_bytes(&[SERVER_READY]);
        LinkSession::with_parts(lines, SpinWait, config, Arc::new(RecordingObserver::new()))
    }

    #[test]
    fn test_handshake_outlasts_bit_timeout() {
        let mut config = fast_config();
        config.timing.bit_timeout_ms = Some(10);
        config.timing.sync_timeout_ms = Some(2000);
        let quiet = Duration::from_millis(100);
        let mut link = slow_session(config, quiet);
        link.enable().unwrap();

        let start = Instant::now();
        link.wait_for_server().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(90));
        assert_eq!(link.state(), LinkState::Transferring);
    }

    #[test]
    fn test_handshake_without_sync_bound() {
        let mut config = fast_config();
        config.timing.bit_timeout_ms = Some(10);
        config.timing.sync_timeout_ms = None;
        let mut link = slow_session(config, Duration::from_millis(50));
        link.enable().unwrap();

        link.wait_for_server().unwrap();
        assert_eq!(link.state(), LinkState::Transferring);
    }

    #[test]
    fn test_read_byte_timeout_keeps_transferring() {
        let mut link = session(SilentPeer);
        link.driver_mut().queue_peer_bytes(&[SERVER_READY]);
        link.enable().unwrap();
        link.wait_for_server().unwrap();

        let err = link.read_byte().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(link.state(), LinkState::Transferring);
    }

    #[test]
    fn test_enable_failure_releases_lines() {
        let config = fast_config();
        let mut lines = SlowLines::new(&config, SilentPeer, Duration::ZERO);
        lines.broken = Some(Line::InputData);
        let mut link =
            LinkSession::with_parts(lines, SpinWait, config, Arc::new(RecordingObserver::new()));

        let err = link.enable().unwrap_err();
        assert!(matches!(
            err,
            LinkError::Transport(TransportError::Line(LineError::Unavailable { .. }))
        ));
        assert_eq!(link.state(), LinkState::Disabled);
        assert!(link.driver().inner.is_released());
        assert!(link.observer().events().is_empty());
    }

    #[test]
    fn test_enable_twice_is_an_error() {
        let mut link = session(SilentPeer);
        link.enable().unwrap();
        assert_eq!(link.state(), LinkState::Idle);
        assert!(matches!(link.enable(), Err(LinkError::AlreadyEnabled)));
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[test]
    fn test_disable_is_idempotent() {
        let mut link = session(SilentPeer);
        link.disable().unwrap();
        link.enable().unwrap();
        link.disable().unwrap();
        link.disable().unwrap();
        assert_eq!(link.state(), LinkState::Disabled);
        assert!(link.driver().is_released());
    }

    #[test]
    fn test_transfers_refused_while_disabled() {
        let mut link = session(SilentPeer);
        assert!(matches!(link.send_byte(0x00), Err(LinkError::Disabled)));
        assert!(matches!(link.read_byte(), Err(LinkError::Disabled)));
        assert!(matches!(link.send_block(&[1]), Err(LinkError::Disabled)));
        assert!(matches!(link.retrieve_block(), Err(LinkError::Disabled)));
        assert!(matches!(link.wait_for_server(), Err(LinkError::Disabled)));
        assert!(link.driver().writes().is_empty());
    }

    #[test]
    fn test_block_requires_handshake() {
        let mut link = session(BlockPeer::new(Mailbox::default()));
        link.enable().unwrap();
        assert!(matches!(
            link.send_block(&[1, 2]),
            Err(LinkError::InvalidState {
                operation: "send_block",
                state: LinkState::Idle
            })
        ));
    }

    #[test]
    fn test_wait_skips_stray_bytes() {
        let mut link = session(SilentPeer);
        link.driver_mut().queue_peer_bytes(&[0x00, 0xFF, SERVER_READY]);
        link.enable().unwrap();
        link.wait_for_server().unwrap();
        assert_eq!(link.state(), LinkState::Transferring);
        assert_eq!(link.stats().transactions, 1);
        assert!(
            link.observer()
                .events()
                .contains(&LinkEvent::ServerReady { discarded: 2 })
        );
    }

    #[test]
    fn test_wait_timeout_restores_state() {
        let mut link = session(SilentPeer);
        link.enable().unwrap();
        let err = link.wait_for_server().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(link.stats().transactions, 0);
    }

    #[test]
    fn test_block_round_trip() {
        let mut link = session(BlockPeer::new(Mailbox::reflecting()));
        link.enable().unwrap();

        link.wait_for_server().unwrap();
        link.send_block(b"portfolio").unwrap();
        assert_eq!(link.state(), LinkState::Idle);

        link.wait_for_server().unwrap();
        assert_eq!(link.retrieve_block().unwrap(), b"portfolio");
        assert_eq!(link.state(), LinkState::Idle);

        let stats = link.stats();
        assert_eq!(stats.blocks_sent, 1);
        assert_eq!(stats.blocks_received, 1);
        assert_eq!(stats.transactions, 2);
    }

    #[test]
    fn test_block_too_large_keeps_state() {
        let mut config = fast_config();
        config.max_block_size = 4;
        let mock = MockLines::from_config(&config, BlockPeer::new(Mailbox::default()));
        let mut link = LinkSession::with_parts(mock, SpinWait, config, Arc::new(RecordingObserver::new()));
        link.enable().unwrap();
        link.wait_for_server().unwrap();

        assert!(matches!(
            link.send_block(&[0; 5]),
            Err(LinkError::BlockTooLarge { len: 5, max: 4 })
        ));
        assert_eq!(link.state(), LinkState::Transferring);
        link.send_block(&[0; 4]).unwrap();
    }

    #[test]
    fn test_retrieve_rejects_bad_checksum() {
        let mut link = session(SilentPeer);
        link.enable().unwrap();
        link.driver_mut().queue_peer_bytes(&[SERVER_READY]);
        link.wait_for_server().unwrap();

        // Checksum of [0x10] is -(1 + 0 + 0x10); send one off.
        link.driver_mut()
            .queue_peer_bytes(&[BLOCK_START, 1, 0, 0x10, 0xEF ^ 0x01]);
        let err = link.retrieve_block().unwrap_err();
        assert!(matches!(err, LinkError::Framing(FramingError::Checksum { .. })));
        assert!(err.is_recoverable());
        assert_eq!(link.state(), LinkState::Idle);
        // Only the request went out; nothing was echoed.
        assert_eq!(link.driver().sent_bytes(), &[BLOCK_REQUEST]);
    }

    #[test]
    fn test_retrieve_rejects_oversized_length() {
        let mut link = session(SilentPeer);
        link.enable().unwrap();
        link.driver_mut().queue_peer_bytes(&[SERVER_READY]);
        link.wait_for_server().unwrap();

        link.driver_mut().queue_peer_bytes(&[BLOCK_START, 0x00, 0x01]);
        let err = link.retrieve_block_with_capacity(16).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Framing(FramingError::LengthExceeded {
                declared: 256,
                capacity: 16
            })
        ));
    }

    #[test]
    fn test_disable_parks_outputs() {
        let mut link = session(SilentPeer);
        link.enable().unwrap();
        link.driver_mut().queue_peer_bytes(&[SERVER_READY]);
        link.wait_for_server().unwrap();
        link.send_byte(0xFF).unwrap();
        link.disable().unwrap();

        assert_eq!(link.driver().level(Line::OutputClock), Level::High);
        assert_eq!(link.driver().level(Line::OutputData), Level::Low);
    }
}

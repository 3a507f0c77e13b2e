//! The bridging engine.
//!
//! One `BridgeEngine` instance is constructed at startup and owns every piece
//! of mutable bridge state: the UART channel, the receive buffer, the flow
//! controller, the autobaud detector, the client registry, the command
//! multiplexer and the statistics. All operations are run-to-completion
//! methods executed from a single logical thread (see `runtime`); nothing
//! here locks or blocks. Anything that takes time, like an autobaud attempt
//! or a flow-control deadline, is state advanced by `tick()`.

pub mod broadcast;
pub mod buffer;
pub mod clients;
pub mod flow;
pub mod mux;
pub mod runtime;
pub mod stats;

pub use broadcast::{BroadcastConfig, Broadcaster, DrainOutcome};
pub use buffer::RxBuffer;
pub use clients::{
    Admission, ClientId, ClientRegistry, ClientSink, ClientState, MockClientSink, RegistryConfig,
    SinkStatus, ViewerClient,
};
pub use flow::{FixedMemoryProbe, FlowConfig, FlowController, HysteresisLoop, MemoryProbe,
    SharedMemoryProbe};
pub use mux::{CommandMultiplexer, Inbound, CMD_INPUT, CMD_OUTPUT, CMD_RESIZE, CMD_STTY};
pub use runtime::{engine_channel, run_engine, EngineEvent, EngineHandle};
pub use stats::{StatsSnapshot, StatsTracker};

use crate::autobaud::{AutobaudConfig, AutobaudDetector, AutobaudOutcome};
use crate::uart::{DataBits, FrameFormat, Parity, StopBits, UartChannel, UartError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Tunables for one engine instance, typically derived from the loaded
/// `Config`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rx_buffer_capacity: usize,
    pub broadcast: BroadcastConfig,
    pub flow: FlowConfig,
    pub registry: RegistryConfig,
    pub autobaud: AutobaudConfig,
    pub stats_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rx_buffer_capacity: 10240,
            broadcast: BroadcastConfig::default(),
            flow: FlowConfig::default(),
            registry: RegistryConfig::default(),
            autobaud: AutobaudConfig::default(),
            stats_window: Duration::from_secs(1),
        }
    }
}

/// A validated configuration-change request.
///
/// Absent fields keep the channel's current value. Parsing is strict: any
/// invalid field rejects the whole request and nothing is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SttyRequest {
    pub baudrate: Option<u32>,
    pub bits: Option<DataBits>,
    pub parity: Option<Parity>,
    pub stop: Option<StopBits>,
}

/// Rejection reasons for a configuration-change request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SttyError {
    #[error("JSON is invalid")]
    MalformedJson,

    #[error("\"{field}\" {message}")]
    InvalidField {
        field: &'static str,
        message: &'static str,
    },

    #[error("rejected by the UART backend: {0}")]
    Rejected(String),
}

impl SttyError {
    fn invalid(field: &'static str, message: &'static str) -> Self {
        Self::InvalidField { field, message }
    }
}

impl SttyRequest {
    /// Parse a wire request, e.g. `{"baudrate": 9600, "bits": 8, "parity":
    /// null, "stop": 1}`.
    ///
    /// `parity` distinguishes absent (keep current) from `null` (none);
    /// `stop` accepts the wire codes 0, 1, 15 and 2.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SttyError> {
        let doc: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|_| SttyError::MalformedJson)?;
        let obj = doc.as_object().ok_or(SttyError::MalformedJson)?;

        let mut request = SttyRequest::default();

        if let Some(value) = obj.get("baudrate") {
            let baud = value
                .as_u64()
                .filter(|&b| b > 0 && b <= u64::from(u32::MAX))
                .ok_or_else(|| SttyError::invalid("baudrate", "must be a positive number"))?;
            request.baudrate = Some(baud as u32);
        }

        if let Some(value) = obj.get("bits") {
            let bits = value
                .as_i64()
                .and_then(DataBits::from_wire)
                .ok_or_else(|| {
                    SttyError::invalid("bits", "must be a positive number, one of 5, 6, 7, 8")
                })?;
            request.bits = Some(bits);
        }

        match obj.get("parity") {
            None => {}
            Some(serde_json::Value::Null) => request.parity = Some(Parity::None),
            Some(value) => {
                let parity = value
                    .as_i64()
                    .and_then(|code| Parity::from_wire(Some(code)))
                    .ok_or_else(|| {
                        SttyError::invalid(
                            "parity",
                            "must be a number or null, null (none), 0 (even), 1 (odd)",
                        )
                    })?;
                request.parity = Some(parity);
            }
        }

        if let Some(value) = obj.get("stop") {
            let stop = value
                .as_i64()
                .and_then(StopBits::from_wire)
                .ok_or_else(|| {
                    SttyError::invalid("stop", "must be a positive number, one of 0, 1, 15, 2")
                })?;
            request.stop = Some(stop);
        }

        Ok(request)
    }
}

/// The bridge engine. See the module documentation.
pub struct BridgeEngine {
    uart: UartChannel,
    rx_buffer: RxBuffer,
    flow: FlowController,
    detector: AutobaudDetector,
    clients: ClientRegistry,
    mux: CommandMultiplexer,
    broadcaster: Broadcaster,
    stats: StatsTracker,
    pause_signal: bool,
    last_autobaud: Option<AutobaudOutcome>,
}

impl BridgeEngine {
    pub fn new(
        config: EngineConfig,
        uart: UartChannel,
        memory: Box<dyn MemoryProbe>,
        now: Instant,
    ) -> Self {
        Self {
            rx_buffer: RxBuffer::new(config.rx_buffer_capacity),
            flow: FlowController::new(config.flow, config.rx_buffer_capacity, memory),
            detector: AutobaudDetector::new(config.autobaud),
            clients: ClientRegistry::new(config.registry),
            mux: CommandMultiplexer::new(),
            broadcaster: Broadcaster::new(config.broadcast, now),
            stats: StatsTracker::new(config.stats_window, now),
            pause_signal: false,
            last_autobaud: None,
            uart,
        }
    }

    // ---------- Configuration ----------

    /// Apply a new UART configuration. Fail-closed: on rejection the
    /// previous configuration is retained and nothing else changes. Bytes
    /// already buffered are not discarded.
    pub fn configure(&mut self, baud: u32, format: FrameFormat) -> Result<(), UartError> {
        self.uart.configure(baud, format)
    }

    pub fn configuration(&self) -> (u32, FrameFormat) {
        self.uart.configuration()
    }

    /// Apply a validated wire request on top of the current configuration.
    pub fn apply_stty(&mut self, request: &SttyRequest) -> Result<(u32, FrameFormat), SttyError> {
        let (mut baud, mut format) = self.uart.configuration();
        if let Some(b) = request.baudrate {
            baud = b;
        }
        if let Some(bits) = request.bits {
            format.data_bits = bits;
        }
        if let Some(parity) = request.parity {
            format.parity = parity;
        }
        if let Some(stop) = request.stop {
            format.stop_bits = stop;
        }

        self.uart
            .configure(baud, format)
            .map_err(|e| SttyError::Rejected(e.to_string()))?;
        debug!(baud, format = %format, "configuration applied");
        Ok((baud, format))
    }

    // ---------- Statistics ----------

    pub fn total_tx(&self) -> u64 {
        self.stats.total_tx()
    }

    pub fn total_rx(&self) -> u64 {
        self.stats.total_rx()
    }

    pub fn tx_rate(&self) -> u64 {
        self.stats.tx_rate()
    }

    pub fn rx_rate(&self) -> u64 {
        self.stats.rx_rate()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.flow.forced_resumes())
    }

    // ---------- Client lifecycle ----------

    pub fn on_client_connect(
        &mut self,
        id: ClientId,
        sink: Box<dyn ClientSink>,
        now: Instant,
    ) -> Admission {
        let admission = self.clients.admit(id, sink, now);
        if matches!(admission, Admission::Rejected { .. }) {
            // A refusal is followed by a sweep so liveness-expired entries
            // are reclaimed before the viewer's next attempt.
            for dead in self.clients.sweep(now) {
                self.mux.forget(dead);
            }
        }
        admission
    }

    pub fn on_client_ready(&mut self, id: ClientId) {
        self.clients.mark_ready(id);
    }

    /// Remove a client; its fragment-reassembly state is discarded
    /// immediately.
    pub fn on_client_disconnect(&mut self, id: ClientId) {
        self.clients.remove(id);
        self.mux.forget(id);
    }

    pub fn is_client_blocked(&self, id: ClientId) -> bool {
        self.clients.is_blocked(id)
    }

    pub fn on_liveness_response(&mut self, id: ClientId, now: Instant) {
        self.clients.on_liveness_response(id, now);
    }

    /// Transport-level drain acknowledgment: the client can take data again.
    pub fn on_client_drained(&mut self, id: ClientId) {
        self.clients.mark_drained(id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ---------- Inbound protocol ----------

    /// Dispatch one inbound transport fragment through the multiplexer.
    ///
    /// Data from a Blocked client is dropped before it can touch the
    /// command cache. Validation errors from a configuration command are
    /// returned to the caller; the engine state is unchanged by them.
    pub fn on_inbound_message(
        &mut self,
        id: ClientId,
        bytes: &[u8],
        fragment_index: u64,
        fragment_len: usize,
        total_len: u64,
    ) -> Result<(), SttyError> {
        if self.clients.is_blocked(id) {
            warn!(client = id, "blocked client sent data, dropped");
            self.stats.record_blocked_inbound_dropped(bytes.len());
            return Ok(());
        }
        if !self.clients.contains(id) {
            warn!(client = id, "data from unknown client, dropped");
            return Ok(());
        }

        let Some(inbound) = self
            .mux
            .ingest(id, bytes, fragment_index, fragment_len, total_len)
        else {
            return Ok(());
        };

        match inbound {
            Inbound::Stream {
                command: CMD_INPUT,
                payload,
                ..
            } => match self.uart.write(&payload) {
                Ok(n) => self.stats.record_tx(n),
                Err(e) => warn!(client = id, error = %e, "UART write failed"),
            },
            Inbound::Stream {
                command: CMD_RESIZE,
                ..
            } => {
                // No line discipline: the resize is acknowledged by ignoring it.
            }
            Inbound::Stream { command, .. } => {
                warn!(client = id, command, "unknown command, ignored");
            }
            Inbound::Control { payload, .. } => {
                // The command byte is also the JSON opening brace.
                let mut doc = Vec::with_capacity(payload.len() + 1);
                doc.push(CMD_STTY);
                doc.extend_from_slice(&payload);
                let request = SttyRequest::from_json(&doc)?;
                self.apply_stty(&request)?;
            }
        }
        Ok(())
    }

    // ---------- Autobaud ----------

    pub fn start_autobaud(&mut self, now: Instant) -> Result<(), UartError> {
        self.last_autobaud = None;
        self.detector.start(&mut self.uart, now)
    }

    pub fn autobaud_active(&self) -> bool {
        self.detector.is_active()
    }

    /// Outcome of the most recently finished detection session.
    pub fn last_autobaud(&self) -> Option<AutobaudOutcome> {
        self.last_autobaud
    }

    // ---------- Scheduling ----------

    /// Drain whatever the UART has pending into the receive buffer (or into
    /// the autobaud detector while a probe is active).
    pub fn poll_uart(&mut self, now: Instant) {
        let mut scratch = [0u8; 1024];
        // Bounded so a firehose cannot starve the rest of the callback.
        for _ in 0..8 {
            let n = match self.uart.read_available(&mut scratch) {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "UART read failed");
                    break;
                }
            };
            if n == 0 {
                break;
            }

            self.stats.record_rx(n);

            if self.detector.is_active() {
                // Probe traffic is sampled, never broadcast.
                self.detector.observe(&scratch[..n]);
                continue;
            }

            let dropped = self.rx_buffer.push(&scratch[..n]);
            if dropped > 0 {
                warn!(dropped, "receive buffer full, dropping newest bytes");
                self.stats.record_overflow_dropped(dropped);
            }
            self.update_flow(now);
        }
    }

    /// One scheduler tick: advance autobaud, run the flow loops, flush the
    /// broadcaster if due, sweep client liveness, roll the stats window.
    pub fn tick(&mut self, now: Instant) {
        if let Some(outcome) = self.detector.on_tick(&mut self.uart, now) {
            self.last_autobaud = Some(outcome);
        }

        self.update_flow(now);

        if self
            .broadcaster
            .due(self.rx_buffer.fill(), self.uart.baud(), now)
        {
            let outcome = self.broadcaster.drain(&mut self.rx_buffer, &mut self.clients, now);
            if outcome.bytes > 0 {
                self.update_flow(now);
            }
        }

        for id in self.clients.sweep(now) {
            self.mux.forget(id);
        }

        self.stats.roll_window(now);
    }

    /// Whether the pause signal is currently asserted toward the UART.
    pub fn is_paused(&self) -> bool {
        self.pause_signal
    }

    fn update_flow(&mut self, now: Instant) {
        let pause = self.flow.update(self.rx_buffer.free(), now);
        if pause != self.pause_signal {
            self.pause_signal = pause;
            debug!(paused = pause, "pause signal changed");
            if let Err(e) = self.uart.set_flow_paused(pause) {
                warn!(error = %e, "failed to signal flow control");
            }
        }
    }

    /// Current receive-buffer fill, for diagnostics.
    pub fn buffer_fill(&self) -> usize {
        self.rx_buffer.fill()
    }
}

impl std::fmt::Debug for BridgeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeEngine")
            .field("uart", &self.uart)
            .field("buffer_fill", &self.rx_buffer.fill())
            .field("clients", &self.clients.len())
            .field("paused", &self.pause_signal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::MockUart;
    use pretty_assertions::assert_eq;

    fn engine() -> (BridgeEngine, MockUart, Instant) {
        let now = Instant::now();
        let mock = MockUart::new("MOCK0");
        let uart =
            UartChannel::new(Box::new(mock.clone()), 115200, FrameFormat::default()).unwrap();
        let engine = BridgeEngine::new(
            EngineConfig::default(),
            uart,
            Box::new(FixedMemoryProbe(1 << 20)),
            now,
        );
        (engine, mock, now)
    }

    #[test]
    fn test_stty_request_parsing() {
        let request =
            SttyRequest::from_json(br#"{"baudrate": 9600, "bits": 8, "parity": null, "stop": 1}"#)
                .unwrap();
        assert_eq!(request.baudrate, Some(9600));
        assert_eq!(request.bits, Some(DataBits::Eight));
        assert_eq!(request.parity, Some(Parity::None));
        assert_eq!(request.stop, Some(StopBits::One));
    }

    #[test]
    fn test_stty_request_partial_fields() {
        let request = SttyRequest::from_json(br#"{"baudrate": 250000}"#).unwrap();
        assert_eq!(request.baudrate, Some(250000));
        assert_eq!(request.bits, None);
        // Absent parity keeps the current value; null means none.
        assert_eq!(request.parity, None);
    }

    #[test]
    fn test_stty_request_rejects_bad_fields() {
        assert_eq!(
            SttyRequest::from_json(br#"{"bits": 9}"#),
            Err(SttyError::invalid(
                "bits",
                "must be a positive number, one of 5, 6, 7, 8"
            ))
        );
        assert!(SttyRequest::from_json(br#"{"baudrate": 0}"#).is_err());
        assert!(SttyRequest::from_json(br#"{"baudrate": -9600}"#).is_err());
        assert!(SttyRequest::from_json(br#"{"parity": 2}"#).is_err());
        assert!(SttyRequest::from_json(br#"{"stop": 3}"#).is_err());
        assert!(SttyRequest::from_json(b"not json").is_err());
        assert!(SttyRequest::from_json(b"[1, 2]").is_err());
    }

    #[test]
    fn test_stty_parity_codes() {
        let request = SttyRequest::from_json(br#"{"parity": 0}"#).unwrap();
        assert_eq!(request.parity, Some(Parity::Even));
        let request = SttyRequest::from_json(br#"{"parity": 1}"#).unwrap();
        assert_eq!(request.parity, Some(Parity::Odd));
    }

    #[test]
    fn test_apply_stty_merges_with_current() {
        let (mut engine, _mock, _now) = engine();
        let request = SttyRequest {
            baudrate: Some(9600),
            ..Default::default()
        };
        let (baud, format) = engine.apply_stty(&request).unwrap();
        assert_eq!(baud, 9600);
        assert_eq!(format, FrameFormat::default());
        assert_eq!(engine.configuration(), (9600, FrameFormat::default()));
    }

    #[test]
    fn test_rejected_stty_leaves_configuration_unchanged() {
        let (mut engine, mock, _now) = engine();
        mock.set_reject_next_settings(true);
        let request = SttyRequest {
            baudrate: Some(9600),
            stop: Some(StopBits::OneAndHalf),
            ..Default::default()
        };
        assert!(matches!(
            engine.apply_stty(&request),
            Err(SttyError::Rejected(_))
        ));
        assert_eq!(engine.configuration(), (115200, FrameFormat::default()));
    }

    #[test]
    fn test_input_command_writes_to_uart() {
        let (mut engine, mock, now) = engine();
        engine.on_client_connect(1, Box::new(MockClientSink::new()), now);
        engine.on_client_ready(1);

        let msg = b"0ls -la\r";
        engine
            .on_inbound_message(1, msg, 0, msg.len(), msg.len() as u64)
            .unwrap();
        assert_eq!(mock.tx_bytes(), b"ls -la\r");
        assert_eq!(engine.total_tx(), 7);
    }

    #[test]
    fn test_stty_command_over_websocket() {
        let (mut engine, _mock, now) = engine();
        engine.on_client_connect(1, Box::new(MockClientSink::new()), now);
        engine.on_client_ready(1);

        let msg = br#"{"baudrate": 57600}"#;
        engine
            .on_inbound_message(1, msg, 0, msg.len(), msg.len() as u64)
            .unwrap();
        assert_eq!(engine.configuration().0, 57600);
    }

    #[test]
    fn test_invalid_stty_command_reported_and_ignored() {
        let (mut engine, _mock, now) = engine();
        engine.on_client_connect(1, Box::new(MockClientSink::new()), now);
        engine.on_client_ready(1);

        let msg = br#"{"bits": 12}"#;
        let result = engine.on_inbound_message(1, msg, 0, msg.len(), msg.len() as u64);
        assert!(result.is_err());
        assert_eq!(engine.configuration(), (115200, FrameFormat::default()));
    }

    #[test]
    fn test_resize_command_is_ignored() {
        let (mut engine, mock, now) = engine();
        engine.on_client_connect(1, Box::new(MockClientSink::new()), now);
        engine.on_client_ready(1);

        let msg = b"1{\"columns\": 80}";
        engine
            .on_inbound_message(1, msg, 0, msg.len(), msg.len() as u64)
            .unwrap();
        assert!(mock.tx_bytes().is_empty());
    }

    #[test]
    fn test_poll_moves_uart_bytes_into_buffer() {
        let (mut engine, mock, now) = engine();
        mock.feed_rx(b"boot");
        engine.poll_uart(now);
        assert_eq!(engine.buffer_fill(), 4);
        assert_eq!(engine.total_rx(), 4);
    }

    #[test]
    fn test_disconnect_discards_fragment_state() {
        let (mut engine, mock, now) = engine();
        engine.on_client_connect(1, Box::new(MockClientSink::new()), now);
        engine.on_client_ready(1);

        // Open a fragmented sequence, then vanish mid-message.
        engine.on_inbound_message(1, b"0abc", 0, 4, 10).unwrap();
        engine.on_client_disconnect(1);

        // Reconnect and send a continuation: without a cached command it is
        // dropped instead of replaying the stale prefix.
        engine.on_client_connect(1, Box::new(MockClientSink::new()), now);
        engine.on_client_ready(1);
        engine.on_inbound_message(1, b"def", 4, 3, 10).unwrap();
        assert_eq!(mock.tx_bytes(), b"abc");
    }
}

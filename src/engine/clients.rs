//! Viewer client lifecycle: admission, liveness, per-client blocking.
//!
//! Clients are keyed by the transport-assigned connection id and inserted on
//! connect / removed on disconnect; nothing here is reference counted. A
//! client whose sink reports congestion is marked Blocked and simply skipped
//! by the broadcaster until the transport acknowledges a drain.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Transport-assigned connection identifier.
pub type ClientId = u32;

/// Outcome of handing a frame to a client's transport sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// The transport accepted the frame.
    Accepted,
    /// The transport cannot take more data right now.
    Busy,
}

/// Outbound half of a viewer connection.
///
/// Implementations must not block: a sink that cannot accept a frame returns
/// `Busy` instead of waiting.
pub trait ClientSink: Send + std::fmt::Debug {
    /// Hand a wire frame (command byte + payload) to the transport.
    fn send_frame(&mut self, frame: &[u8]) -> SinkStatus;

    /// Ask the transport to probe the client's liveness.
    fn send_ping(&mut self);
}

/// Lifecycle state of a viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Connected,
    Blocked,
    Disconnected,
}

#[derive(Debug)]
pub struct ViewerClient {
    pub id: ClientId,
    pub state: ClientState,
    sink: Box<dyn ClientSink>,
    last_liveness: Instant,
    last_ping: Option<Instant>,
    connected_at: Instant,
}

impl ViewerClient {
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

/// Admission decision for a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected { reason: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub max_clients: usize,
    /// Idle time after which a client is pinged.
    pub ping_interval: Duration,
    /// Grace period after the ping before forced removal.
    pub liveness_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_clients: 3,
            ping_interval: Duration::from_secs(300),
            liveness_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ClientRegistry {
    clients: HashMap<ClientId, ViewerClient>,
    config: RegistryConfig,
}

impl ClientRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            clients: HashMap::new(),
            config,
        }
    }

    /// Admit a new connection if below capacity.
    pub fn admit(&mut self, id: ClientId, sink: Box<dyn ClientSink>, now: Instant) -> Admission {
        if self.clients.contains_key(&id) {
            warn!(client = id, "duplicate client id refused");
            return Admission::Rejected {
                reason: "duplicate client id",
            };
        }
        if self.clients.len() >= self.config.max_clients {
            info!(client = id, max = self.config.max_clients, "viewer refused: at capacity");
            return Admission::Rejected {
                reason: "too many clients",
            };
        }

        debug!(client = id, "viewer admitted");
        self.clients.insert(
            id,
            ViewerClient {
                id,
                state: ClientState::Connecting,
                sink,
                last_liveness: now,
                last_ping: None,
                connected_at: now,
            },
        );
        Admission::Accepted
    }

    /// Transport handshake finished: the client may now receive broadcasts.
    pub fn mark_ready(&mut self, id: ClientId) {
        if let Some(client) = self.clients.get_mut(&id) {
            if client.state == ClientState::Connecting {
                client.state = ClientState::Connected;
            }
        }
    }

    /// Remove a client. Returns true if it was present.
    pub fn remove(&mut self, id: ClientId) -> bool {
        if let Some(mut client) = self.clients.remove(&id) {
            client.state = ClientState::Disconnected;
            debug!(client = id, "viewer removed");
            true
        } else {
            false
        }
    }

    /// The transport reported the client cannot currently accept more data.
    pub fn mark_blocked(&mut self, id: ClientId) {
        if let Some(client) = self.clients.get_mut(&id) {
            if client.state == ClientState::Connected {
                warn!(client = id, "viewer blocked: transport congested");
                client.state = ClientState::Blocked;
            }
        }
    }

    /// Transport-level drain acknowledgment.
    pub fn mark_drained(&mut self, id: ClientId) {
        if let Some(client) = self.clients.get_mut(&id) {
            if client.state == ClientState::Blocked {
                debug!(client = id, "viewer drained, unblocking");
                client.state = ClientState::Connected;
            }
        }
    }

    pub fn is_blocked(&self, id: ClientId) -> bool {
        self.clients
            .get(&id)
            .map(|c| c.state == ClientState::Blocked)
            .unwrap_or(false)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn state_of(&self, id: ClientId) -> Option<ClientState> {
        self.clients.get(&id).map(|c| c.state)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Record a liveness response (pong) from the client.
    pub fn on_liveness_response(&mut self, id: ClientId, now: Instant) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.last_liveness = now;
            client.last_ping = None;
        }
    }

    /// Probe idle clients and reclaim those that failed to respond.
    ///
    /// Returns the ids that were force-removed so callers can discard any
    /// per-client state they hold.
    pub fn sweep(&mut self, now: Instant) -> Vec<ClientId> {
        let mut dead = Vec::new();
        for client in self.clients.values_mut() {
            let idle = now.duration_since(client.last_liveness);
            if idle < self.config.ping_interval {
                continue;
            }
            match client.last_ping {
                None => {
                    debug!(client = client.id, "probing idle viewer");
                    client.sink.send_ping();
                    client.last_ping = Some(now);
                }
                Some(pinged) => {
                    if now.duration_since(pinged) >= self.config.liveness_timeout {
                        warn!(client = client.id, "viewer failed liveness probe");
                        dead.push(client.id);
                    }
                }
            }
        }
        for id in &dead {
            self.remove(*id);
        }
        dead
    }

    /// Send a frame to every Connected client; Blocked clients receive
    /// nothing. Clients whose sink reports congestion are marked Blocked.
    /// Returns how many clients accepted the frame.
    pub fn broadcast_frame(&mut self, frame: &[u8]) -> usize {
        let mut sent = 0;
        for client in self.clients.values_mut() {
            if client.state != ClientState::Connected {
                continue;
            }
            match client.sink.send_frame(frame) {
                SinkStatus::Accepted => sent += 1,
                SinkStatus::Busy => {
                    warn!(client = client.id, "viewer blocked: transport congested");
                    client.state = ClientState::Blocked;
                }
            }
        }
        sent
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.clients.len())
            .field("max_clients", &self.config.max_clients)
            .finish()
    }
}

// ---------- Mock sink ----------

#[derive(Debug, Default)]
struct MockSinkState {
    frames: Vec<Vec<u8>>,
    pings: usize,
    busy: bool,
}

/// Recording sink for tests.
///
/// Tests keep a clone while the registry owns the boxed sink; both see the
/// same state.
#[derive(Clone, Default)]
pub struct MockClientSink {
    state: std::sync::Arc<std::sync::Mutex<MockSinkState>>,
}

impl MockClientSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends report `Busy`.
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().unwrap().busy = busy;
    }

    /// All frames accepted so far (command byte included).
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().frames.clone()
    }

    /// Total payload bytes received (frames minus their command byte).
    pub fn payload_bytes(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .frames
            .iter()
            .map(|f| f.len().saturating_sub(1))
            .sum()
    }

    pub fn pings(&self) -> usize {
        self.state.lock().unwrap().pings
    }
}

impl ClientSink for MockClientSink {
    fn send_frame(&mut self, frame: &[u8]) -> SinkStatus {
        let mut state = self.state.lock().unwrap();
        if state.busy {
            return SinkStatus::Busy;
        }
        state.frames.push(frame.to_vec());
        SinkStatus::Accepted
    }

    fn send_ping(&mut self) {
        self.state.lock().unwrap().pings += 1;
    }
}

impl std::fmt::Debug for MockClientSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("MockClientSink")
            .field("frames", &state.frames.len())
            .field("busy", &state.busy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(RegistryConfig {
            max_clients: 2,
            ping_interval: Duration::from_secs(300),
            liveness_timeout: Duration::from_secs(10),
        })
    }

    #[test]
    fn test_admission_up_to_capacity() {
        let now = Instant::now();
        let mut reg = registry();

        assert_eq!(
            reg.admit(1, Box::new(MockClientSink::new()), now),
            Admission::Accepted
        );
        assert_eq!(
            reg.admit(2, Box::new(MockClientSink::new()), now),
            Admission::Accepted
        );
        assert!(matches!(
            reg.admit(3, Box::new(MockClientSink::new()), now),
            Admission::Rejected { .. }
        ));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_duplicate_id_refused() {
        let now = Instant::now();
        let mut reg = registry();
        reg.admit(1, Box::new(MockClientSink::new()), now);
        assert!(matches!(
            reg.admit(1, Box::new(MockClientSink::new()), now),
            Admission::Rejected { .. }
        ));
    }

    #[test]
    fn test_state_transitions() {
        let now = Instant::now();
        let mut reg = registry();
        reg.admit(1, Box::new(MockClientSink::new()), now);
        assert_eq!(reg.state_of(1), Some(ClientState::Connecting));

        reg.mark_ready(1);
        assert_eq!(reg.state_of(1), Some(ClientState::Connected));

        reg.mark_blocked(1);
        assert!(reg.is_blocked(1));

        reg.mark_drained(1);
        assert_eq!(reg.state_of(1), Some(ClientState::Connected));

        assert!(reg.remove(1));
        assert!(!reg.contains(1));
        assert!(!reg.remove(1));
    }

    #[test]
    fn test_drain_only_unblocks_blocked() {
        let now = Instant::now();
        let mut reg = registry();
        reg.admit(1, Box::new(MockClientSink::new()), now);
        // Drain ack for a client that was never blocked is a no-op.
        reg.mark_drained(1);
        assert_eq!(reg.state_of(1), Some(ClientState::Connecting));
    }

    #[test]
    fn test_broadcast_skips_blocked_and_marks_busy() {
        let now = Instant::now();
        let mut reg = registry();
        let fast = MockClientSink::new();
        let slow = MockClientSink::new();
        reg.admit(1, Box::new(fast.clone()), now);
        reg.admit(2, Box::new(slow.clone()), now);
        reg.mark_ready(1);
        reg.mark_ready(2);

        slow.set_busy(true);
        let sent = reg.broadcast_frame(b"0data");
        assert_eq!(sent, 1);
        assert_eq!(fast.frames().len(), 1);
        assert!(slow.frames().is_empty());
        assert!(reg.is_blocked(2));

        // While blocked the client receives nothing, even once the sink
        // would accept again.
        slow.set_busy(false);
        reg.broadcast_frame(b"0more");
        assert!(slow.frames().is_empty());
        assert_eq!(fast.frames().len(), 2);
    }

    #[test]
    fn test_liveness_sweep_pings_then_removes() {
        let t0 = Instant::now();
        let mut reg = registry();
        let sink = MockClientSink::new();
        reg.admit(1, Box::new(sink.clone()), t0);
        reg.mark_ready(1);

        // Not idle yet: nothing happens.
        assert!(reg.sweep(t0 + Duration::from_secs(100)).is_empty());
        assert_eq!(sink.pings(), 0);

        // Idle past the ping interval: probe once.
        let t_ping = t0 + Duration::from_secs(301);
        assert!(reg.sweep(t_ping).is_empty());
        assert_eq!(sink.pings(), 1);
        assert!(reg.sweep(t_ping + Duration::from_secs(1)).is_empty());
        assert_eq!(sink.pings(), 1);

        // No pong within the grace period: removed on the next sweep.
        let dead = reg.sweep(t_ping + Duration::from_secs(10));
        assert_eq!(dead, vec![1]);
        assert!(!reg.contains(1));
    }

    #[test]
    fn test_pong_resets_liveness() {
        let t0 = Instant::now();
        let mut reg = registry();
        let sink = MockClientSink::new();
        reg.admit(1, Box::new(sink.clone()), t0);
        reg.mark_ready(1);

        let t_ping = t0 + Duration::from_secs(301);
        reg.sweep(t_ping);
        assert_eq!(sink.pings(), 1);

        reg.on_liveness_response(1, t_ping + Duration::from_secs(1));
        let dead = reg.sweep(t_ping + Duration::from_secs(11));
        assert!(dead.is_empty());
        assert!(reg.contains(1));
    }
}

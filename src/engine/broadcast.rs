//! Latency-bounded draining of the receive buffer toward the viewers.
//!
//! A drain happens either when a full send chunk has accumulated or when the
//! baud-derived flush delay has elapsed with data pending. The delay scales
//! with the time one chunk takes on the wire (derated to 2/3) so that fast
//! links flush sooner, and is capped so slow links never sit on data for
//! long.

use super::buffer::RxBuffer;
use super::clients::ClientRegistry;
use super::mux::CMD_OUTPUT;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Maximum payload bytes per drain.
    pub chunk_size: usize,
    /// Hard upper bound on the dynamic flush delay.
    pub max_flush_delay: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1536,
            max_flush_delay: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Payload bytes removed from the buffer.
    pub bytes: usize,
    /// Clients that accepted the frame.
    pub recipients: usize,
}

#[derive(Debug)]
pub struct Broadcaster {
    config: BroadcastConfig,
    last_flush: Instant,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig, now: Instant) -> Self {
        Self {
            config,
            last_flush: now,
        }
    }

    /// Time to wait before flushing a partial chunk at the given baud rate.
    pub fn flush_delay(&self, baud: u32) -> Duration {
        let bits = self.config.chunk_size as u64 * 8 * 2 / 3;
        let micros = bits.saturating_mul(1_000_000) / u64::from(baud.max(1));
        Duration::from_micros(micros).min(self.config.max_flush_delay)
    }

    /// Whether a drain should run now.
    pub fn due(&self, fill: usize, baud: u32, now: Instant) -> bool {
        if fill >= self.config.chunk_size {
            return true;
        }
        fill > 0 && now.duration_since(self.last_flush) >= self.flush_delay(baud)
    }

    /// Remove up to one chunk from the buffer and fan it out.
    ///
    /// Blocked clients receive nothing for this drain; the shared buffer is
    /// the only buffer, so the bytes are gone for them (lossy by design).
    pub fn drain(
        &mut self,
        buffer: &mut RxBuffer,
        clients: &mut ClientRegistry,
        now: Instant,
    ) -> DrainOutcome {
        let chunk = buffer.drain_chunk(self.config.chunk_size);
        self.last_flush = now;
        if chunk.is_empty() {
            return DrainOutcome {
                bytes: 0,
                recipients: 0,
            };
        }

        let mut frame = Vec::with_capacity(chunk.len() + 1);
        frame.push(CMD_OUTPUT);
        frame.extend_from_slice(&chunk);

        let recipients = clients.broadcast_frame(&frame);
        trace!(bytes = chunk.len(), recipients, "drained chunk");
        DrainOutcome {
            bytes: chunk.len(),
            recipients,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clients::{ClientRegistry, MockClientSink, RegistryConfig};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_flush_delay_scales_with_baud_and_is_capped() {
        let t0 = Instant::now();
        let caster = Broadcaster::new(BroadcastConfig::default(), t0);

        // 1536 bytes at 115200 baud take ~107 ms on the wire; the delay is
        // capped well below that.
        assert_eq!(caster.flush_delay(115_200), ms(5));

        // At very high rates the derated wire time dips below the cap.
        let fast = caster.flush_delay(3_000_000);
        assert!(fast < ms(5));
        assert!(fast > Duration::ZERO);

        // Slower links never exceed the cap either.
        assert_eq!(caster.flush_delay(9600), ms(5));
    }

    #[test]
    fn test_due_on_full_chunk_or_delay() {
        let t0 = Instant::now();
        let caster = Broadcaster::new(BroadcastConfig::default(), t0);

        assert!(caster.due(1536, 115_200, t0));
        assert!(caster.due(5000, 115_200, t0));
        // Partial chunk, delay not yet elapsed.
        assert!(!caster.due(100, 115_200, t0 + ms(1)));
        // Partial chunk, delay elapsed.
        assert!(caster.due(100, 115_200, t0 + ms(5)));
        // Empty buffer is never due.
        assert!(!caster.due(0, 115_200, t0 + ms(60)));
    }

    #[test]
    fn test_drain_sends_one_chunk_with_output_prefix() {
        let t0 = Instant::now();
        let mut caster = Broadcaster::new(
            BroadcastConfig {
                chunk_size: 4,
                max_flush_delay: ms(5),
            },
            t0,
        );
        let mut buffer = RxBuffer::new(64);
        buffer.push(b"abcdefgh");

        let mut clients = ClientRegistry::new(RegistryConfig::default());
        let sink = MockClientSink::new();
        clients.admit(1, Box::new(sink.clone()), t0);
        clients.mark_ready(1);

        let outcome = caster.drain(&mut buffer, &mut clients, t0);
        assert_eq!(outcome, DrainOutcome { bytes: 4, recipients: 1 });
        assert_eq!(buffer.fill(), 4);
        assert_eq!(sink.frames(), vec![b"0abcd".to_vec()]);
    }

    #[test]
    fn test_drain_empty_buffer_is_noop() {
        let t0 = Instant::now();
        let mut caster = Broadcaster::new(BroadcastConfig::default(), t0);
        let mut buffer = RxBuffer::new(64);
        let mut clients = ClientRegistry::new(RegistryConfig::default());

        let outcome = caster.drain(&mut buffer, &mut clients, t0);
        assert_eq!(outcome.bytes, 0);
    }
}

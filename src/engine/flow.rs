//! Flow control: two hysteresis loops driving one UART pause signal.
//!
//! Each loop is an instance of the same `HysteresisLoop` state machine so
//! that both enforce the identical never-stall rule: once asserted, a loop
//! deasserts either when its clearing condition holds or when its maximum
//! assertion duration elapses, whichever comes first.
//!
//! Threshold semantics, chosen once and used consistently: the generic loop
//! is headroom-oriented. It asserts when headroom (free space) drops to
//! `assert_below` or less and clears when headroom recovers to
//! `resume_above` or more; `assert_below < resume_above` is the dead band
//! that prevents chatter. The buffer loop's configuration is expressed as
//! fill watermarks (stop when fill >= stop watermark, resume when fill <=
//! resume watermark) and converted to headroom against the buffer capacity;
//! the memory loop's low/high free-heap watermarks are already headroom.

use std::time::{Duration, Instant};
use tracing::warn;

/// Source of the free-memory figure the memory loop watches.
///
/// On a host build this is typically a fixed figure (memory pressure handled
/// by the OS); embedded ports hook their allocator statistics in here.
pub trait MemoryProbe: Send {
    fn free_bytes(&self) -> usize;
}

/// Probe reporting a constant amount of free memory.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub usize);

impl MemoryProbe for FixedMemoryProbe {
    fn free_bytes(&self) -> usize {
        self.0
    }
}

/// Probe backed by a shared atomic, for tests and external monitors.
#[derive(Debug, Clone)]
pub struct SharedMemoryProbe(pub std::sync::Arc<std::sync::atomic::AtomicUsize>);

impl SharedMemoryProbe {
    pub fn new(initial: usize) -> Self {
        Self(std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(
            initial,
        )))
    }

    pub fn set(&self, free: usize) {
        self.0.store(free, std::sync::atomic::Ordering::Relaxed);
    }
}

impl MemoryProbe for SharedMemoryProbe {
    fn free_bytes(&self) -> usize {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Deasserted,
    Asserted { since: Instant },
}

/// One hysteresis loop with a forced-resume deadline.
#[derive(Debug)]
pub struct HysteresisLoop {
    label: &'static str,
    assert_below: usize,
    resume_above: usize,
    max_assert: Duration,
    state: LoopState,
    forced_resumes: u64,
}

impl HysteresisLoop {
    /// `assert_below` must be strictly less than `resume_above`; the gap is
    /// the dead band.
    pub fn new(
        label: &'static str,
        assert_below: usize,
        resume_above: usize,
        max_assert: Duration,
    ) -> Self {
        debug_assert!(assert_below < resume_above);
        Self {
            label,
            assert_below,
            resume_above,
            max_assert,
            state: LoopState::Deasserted,
            forced_resumes: 0,
        }
    }

    /// Advance the loop against the current headroom. Returns whether the
    /// loop is asserted after the update.
    pub fn update(&mut self, headroom: usize, now: Instant) -> bool {
        match self.state {
            LoopState::Deasserted => {
                if headroom <= self.assert_below {
                    self.state = LoopState::Asserted { since: now };
                }
            }
            LoopState::Asserted { since } => {
                if headroom >= self.resume_above {
                    self.state = LoopState::Deasserted;
                } else if now.duration_since(since) >= self.max_assert {
                    // Hard deadline: resume even though the condition still
                    // holds, accepting the overflow risk over a stalled link.
                    self.forced_resumes += 1;
                    warn!(
                        loop_ = self.label,
                        headroom, "flow loop hit max assertion, forcing resume"
                    );
                    self.state = LoopState::Deasserted;
                }
            }
        }
        self.is_asserted()
    }

    pub fn is_asserted(&self) -> bool {
        matches!(self.state, LoopState::Asserted { .. })
    }

    /// Episodes that ended by deadline instead of by the clearing condition.
    pub fn forced_resumes(&self) -> u64 {
        self.forced_resumes
    }
}

/// Watermark configuration for the flow controller.
#[derive(Debug, Clone, Copy)]
pub struct FlowConfig {
    /// Buffer fill at or above which the buffer loop asserts.
    pub buffer_stop_fill: usize,
    /// Buffer fill at or below which the buffer loop resumes.
    pub buffer_resume_fill: usize,
    /// Max assertion duration for the buffer loop.
    pub buffer_max_assert: Duration,
    /// Free memory at or below which the memory loop asserts.
    pub memory_low_watermark: usize,
    /// Free memory at or above which the memory loop resumes.
    pub memory_high_watermark: usize,
    /// Max assertion duration for the memory loop.
    pub memory_max_assert: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            buffer_stop_fill: 8704,
            buffer_resume_fill: 2304,
            buffer_max_assert: Duration::from_millis(500),
            memory_low_watermark: 4096,
            memory_high_watermark: 10240,
            memory_max_assert: Duration::from_millis(500),
        }
    }
}

/// The two loops plus the memory probe, combined into one pause signal.
pub struct FlowController {
    buffer_loop: HysteresisLoop,
    memory_loop: HysteresisLoop,
    memory: Box<dyn MemoryProbe>,
}

impl FlowController {
    pub fn new(config: FlowConfig, buffer_capacity: usize, memory: Box<dyn MemoryProbe>) -> Self {
        // Fill watermarks to headroom: stop fill >= X means headroom <= cap - X.
        let assert_below = buffer_capacity.saturating_sub(config.buffer_stop_fill);
        let resume_above = buffer_capacity.saturating_sub(config.buffer_resume_fill);
        Self {
            buffer_loop: HysteresisLoop::new(
                "buffer",
                assert_below,
                resume_above,
                config.buffer_max_assert,
            ),
            memory_loop: HysteresisLoop::new(
                "memory",
                config.memory_low_watermark,
                config.memory_high_watermark,
                config.memory_max_assert,
            ),
            memory,
        }
    }

    /// Run both loops against the current buffer headroom and free memory.
    /// Returns whether the pause signal should be asserted: true iff at
    /// least one loop is asserted.
    pub fn update(&mut self, buffer_headroom: usize, now: Instant) -> bool {
        let buffer = self.buffer_loop.update(buffer_headroom, now);
        let memory = self.memory_loop.update(self.memory.free_bytes(), now);
        buffer || memory
    }

    pub fn is_paused(&self) -> bool {
        self.buffer_loop.is_asserted() || self.memory_loop.is_asserted()
    }

    pub fn buffer_loop(&self) -> &HysteresisLoop {
        &self.buffer_loop
    }

    pub fn memory_loop(&self) -> &HysteresisLoop {
        &self.memory_loop
    }

    pub fn forced_resumes(&self) -> u64 {
        self.buffer_loop.forced_resumes() + self.memory_loop.forced_resumes()
    }
}

impl std::fmt::Debug for FlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowController")
            .field("buffer_loop", &self.buffer_loop)
            .field("memory_loop", &self.memory_loop)
            .finish()
    }
}

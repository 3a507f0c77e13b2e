//! Baud-rate auto-detection.
//!
//! A time-boxed state machine entered when the configured rate is unknown or
//! on explicit request. Candidates are probed in order, cycling until either
//! one looks plausible or the overall deadline expires; each attempt advances
//! on timer ticks, never by waiting. On failure the channel reverts to its
//! pre-probe configuration.
//!
//! Plausibility heuristic: an attempt is accepted when at least
//! `min_sample` bytes arrived during its window and at least 80% of them are
//! text-like (printable ASCII or TAB/LF/CR/ESC). Serial consoles are
//! overwhelmingly textual; a wrong baud rate turns the stream into dense
//! high-bit noise that fails the ratio.

use crate::uart::{UartChannel, FrameFormat};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Candidate rates in probe order, most common first.
pub const DEFAULT_CANDIDATES: &[u32] = &[
    115200, 9600, 57600, 38400, 19200, 230400, 460800, 921600, 1500000,
];

#[derive(Debug, Clone)]
pub struct AutobaudConfig {
    /// Ordered candidate rates; cycled until the deadline.
    pub candidates: Vec<u32>,
    /// Observation window per attempt.
    pub attempt_window: Duration,
    /// Hard deadline for the whole session.
    pub overall_timeout: Duration,
    /// Minimum bytes an attempt must observe to be judged at all.
    pub min_sample: usize,
}

impl Default for AutobaudConfig {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.to_vec(),
            attempt_window: Duration::from_millis(100),
            overall_timeout: Duration::from_secs(10),
            min_sample: 8,
        }
    }
}

/// Terminal outcome of a detection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutobaudOutcome {
    Detected(u32),
    Failed,
}

#[derive(Debug)]
struct AutobaudSession {
    /// Index into the candidate list.
    cursor: usize,
    attempt_started: Instant,
    deadline: Instant,
    /// Configuration to restore if the session fails.
    fallback: (u32, FrameFormat),
    text_like: usize,
    observed: usize,
}

/// The detector; owns at most one active session.
#[derive(Debug)]
pub struct AutobaudDetector {
    config: AutobaudConfig,
    session: Option<AutobaudSession>,
}

impl AutobaudDetector {
    pub fn new(config: AutobaudConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Begin probing. The channel is configured at the first candidate; its
    /// current configuration becomes the fallback. A session already in
    /// progress is restarted.
    pub fn start(&mut self, uart: &mut UartChannel, now: Instant) -> Result<(), crate::uart::UartError> {
        if self.config.candidates.is_empty() {
            warn!("autobaud requested with no candidates configured");
            return Ok(());
        }
        let fallback = uart.configuration();
        uart.configure(self.config.candidates[0], fallback.1)?;
        info!(
            first = self.config.candidates[0],
            candidates = self.config.candidates.len(),
            "autobaud session started"
        );
        self.session = Some(AutobaudSession {
            cursor: 0,
            attempt_started: now,
            deadline: now + self.config.overall_timeout,
            fallback,
            text_like: 0,
            observed: 0,
        });
        Ok(())
    }

    /// Feed bytes read from the UART while a session is active.
    pub fn observe(&mut self, bytes: &[u8]) {
        if let Some(session) = self.session.as_mut() {
            session.observed += bytes.len();
            session.text_like += bytes.iter().filter(|&&b| is_text_like(b)).count();
        }
    }

    /// Advance the session on a timer tick.
    ///
    /// Returns the terminal outcome when the session ends; `None` while it
    /// is still pending or when no session is active.
    pub fn on_tick(&mut self, uart: &mut UartChannel, now: Instant) -> Option<AutobaudOutcome> {
        let session = self.session.as_mut()?;

        // The overall deadline is hard: it fires even if the current attempt
        // window has not finished.
        if now >= session.deadline {
            let (baud, format) = session.fallback;
            if let Err(e) = uart.configure(baud, format) {
                warn!(error = %e, "failed to restore pre-probe configuration");
            }
            info!(fallback = baud, "autobaud failed, reverting");
            self.session = None;
            return Some(AutobaudOutcome::Failed);
        }

        if now.duration_since(session.attempt_started) < self.config.attempt_window {
            return None;
        }

        let candidate = self.config.candidates[session.cursor];
        if is_plausible(session.text_like, session.observed, self.config.min_sample) {
            info!(baud = candidate, observed = session.observed, "autobaud detected");
            self.session = None;
            return Some(AutobaudOutcome::Detected(candidate));
        }

        // Move to the next candidate, wrapping until the deadline expires.
        session.cursor = (session.cursor + 1) % self.config.candidates.len();
        session.attempt_started = now;
        session.text_like = 0;
        session.observed = 0;
        let next = self.config.candidates[session.cursor];
        debug!(baud = next, "autobaud trying next candidate");
        let format = session.fallback.1;
        if let Err(e) = uart.configure(next, format) {
            warn!(baud = next, error = %e, "candidate rejected by backend, skipping");
        }
        None
    }
}

/// Whether an attempt's sample passes the plausibility bar.
fn is_plausible(text_like: usize, observed: usize, min_sample: usize) -> bool {
    observed >= min_sample && text_like * 10 >= observed * 8
}

/// Printable ASCII plus the control bytes a console legitimately emits.
fn is_text_like(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7e | b'\t' | b'\r' | b'\n' | 0x1b)
}

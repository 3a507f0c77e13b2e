//! Mock UART implementation for testing.
//!
//! Provides a `MockUart` that simulates the physical link without hardware.
//! Tests keep a clone of the mock while the engine owns the boxed backend;
//! both see the same state.

use super::error::UartError;
use super::traits::{FrameFormat, UartBackend};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Inner state of the mock UART, protected by a mutex for interior mutability.
#[derive(Debug, Default)]
struct MockUartState {
    /// Bytes the simulated remote device has transmitted toward the bridge.
    rx_queue: VecDeque<u8>,
    /// Log of all byte slices written out of the bridge.
    tx_log: Vec<Vec<u8>>,
    /// Every configuration applied to the link, newest last.
    settings_log: Vec<(u32, FrameFormat)>,
    /// Every pause-signal transition, newest last.
    pause_log: Vec<bool>,
    /// Whether the next apply_settings call should be rejected.
    reject_next_settings: bool,
    /// Whether read operations should fail with an I/O error.
    fail_reads: bool,
}

/// Mock UART for tests.
///
/// # Example
/// ```
/// use uart_ws_bridge::uart::{MockUart, UartBackend};
///
/// let mut uart = MockUart::new("MOCK0");
/// uart.feed_rx(b"boot ok\r\n");
///
/// let mut buffer = [0u8; 16];
/// let n = uart.read_available(&mut buffer).unwrap();
/// assert_eq!(&buffer[..n], b"boot ok\r\n");
/// ```
#[derive(Clone)]
pub struct MockUart {
    name: String,
    state: Arc<Mutex<MockUartState>>,
}

impl MockUart {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockUartState::default())),
        }
    }

    /// Enqueue bytes as if the remote device had transmitted them.
    pub fn feed_rx(&self, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.rx_queue.extend(data);
    }

    /// All bytes the bridge has written, flattened in order.
    pub fn tx_bytes(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state.tx_log.iter().flatten().copied().collect()
    }

    /// The individual write calls the bridge has made.
    pub fn tx_log(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.tx_log.clone()
    }

    /// The most recently applied configuration, if any.
    pub fn settings(&self) -> Option<(u32, FrameFormat)> {
        let state = self.state.lock().unwrap();
        state.settings_log.last().copied()
    }

    /// Every configuration ever applied, in order.
    pub fn settings_log(&self) -> Vec<(u32, FrameFormat)> {
        let state = self.state.lock().unwrap();
        state.settings_log.clone()
    }

    /// Every pause-signal transition, in order.
    pub fn pause_log(&self) -> Vec<bool> {
        let state = self.state.lock().unwrap();
        state.pause_log.clone()
    }

    /// Reject the next `apply_settings` call with an Unsupported error.
    pub fn set_reject_next_settings(&self, reject: bool) {
        let mut state = self.state.lock().unwrap();
        state.reject_next_settings = reject;
    }

    /// Make subsequent reads fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        let mut state = self.state.lock().unwrap();
        state.fail_reads = fail;
    }

    /// Bytes still queued for the bridge to read.
    pub fn pending_rx(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.rx_queue.len()
    }
}

impl UartBackend for MockUart {
    fn apply_settings(&mut self, baud: u32, format: FrameFormat) -> Result<(), UartError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_next_settings {
            state.reject_next_settings = false;
            return Err(UartError::unsupported(format.to_string()));
        }
        state.settings_log.push((baud, format));
        Ok(())
    }

    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, UartError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(UartError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated read failure",
            )));
        }

        let mut bytes_read = 0;
        for byte in buffer.iter_mut() {
            if let Some(queued) = state.rx_queue.pop_front() {
                *byte = queued;
                bytes_read += 1;
            } else {
                break;
            }
        }
        Ok(bytes_read)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, UartError> {
        let mut state = self.state.lock().unwrap();
        state.tx_log.push(data.to_vec());
        Ok(data.len())
    }

    fn set_flow_paused(&mut self, paused: bool) -> Result<(), UartError> {
        let mut state = self.state.lock().unwrap();
        state.pause_log.push(paused);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MockUart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockUart")
            .field("name", &self.name)
            .field("pending_rx", &self.pending_rx())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_and_read() {
        let mut uart = MockUart::new("MOCK0");
        uart.feed_rx(b"hello");

        let mut buffer = [0u8; 10];
        let n = uart.read_available(&mut buffer).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buffer[..n], b"hello");
        assert_eq!(uart.read_available(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_partial_read() {
        let mut uart = MockUart::new("MOCK0");
        uart.feed_rx(b"hello, world!");

        let mut buffer = [0u8; 5];
        let n = uart.read_available(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"hello");
        assert_eq!(uart.pending_rx(), 8);
    }

    #[test]
    fn test_write_logging() {
        let mut uart = MockUart::new("MOCK0");
        uart.write_bytes(b"one").unwrap();
        uart.write_bytes(b"two").unwrap();

        assert_eq!(uart.tx_log(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(uart.tx_bytes(), b"onetwo");
    }

    #[test]
    fn test_settings_rejection() {
        let mut uart = MockUart::new("MOCK0");
        uart.set_reject_next_settings(true);

        let result = uart.apply_settings(9600, FrameFormat::default());
        assert!(matches!(result, Err(UartError::Unsupported(_))));
        assert!(uart.settings().is_none());

        // Rejection is one-shot.
        uart.apply_settings(9600, FrameFormat::default()).unwrap();
        assert_eq!(uart.settings(), Some((9600, FrameFormat::default())));
    }

    #[test]
    fn test_pause_log() {
        let mut uart = MockUart::new("MOCK0");
        uart.set_flow_paused(true).unwrap();
        uart.set_flow_paused(false).unwrap();
        assert_eq!(uart.pause_log(), vec![true, false]);
    }

    #[test]
    fn test_clone_shares_state() {
        let uart = MockUart::new("MOCK0");
        let mut boxed: Box<dyn UartBackend> = Box::new(uart.clone());

        uart.feed_rx(b"xyz");
        let mut buffer = [0u8; 3];
        assert_eq!(boxed.read_available(&mut buffer).unwrap(), 3);
        assert_eq!(uart.pending_rx(), 0);
    }
}

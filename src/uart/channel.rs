//! The UART channel owned by the bridge engine.
//!
//! Wraps a `UartBackend` with the current configuration and the cumulative
//! byte counters. Reconfiguration is fail-closed: the backend applies the new
//! settings before any channel state mutates, so a rejected request leaves
//! the previous configuration fully intact.

use super::error::UartError;
use super::traits::{FrameFormat, UartBackend};

pub struct UartChannel {
    backend: Box<dyn UartBackend>,
    baud: u32,
    format: FrameFormat,
    total_tx: u64,
    total_rx: u64,
}

impl UartChannel {
    /// Create a channel and push the initial configuration to the backend.
    pub fn new(
        mut backend: Box<dyn UartBackend>,
        baud: u32,
        format: FrameFormat,
    ) -> Result<Self, UartError> {
        if baud == 0 {
            return Err(UartError::InvalidBaud(baud));
        }
        backend.apply_settings(baud, format)?;
        Ok(Self {
            backend,
            baud,
            format,
            total_tx: 0,
            total_rx: 0,
        })
    }

    /// Reconfigure the link. Validation happens before any state mutates;
    /// on rejection the previous configuration is retained.
    ///
    /// Bytes already sitting in the engine's receive buffer are unaffected.
    pub fn configure(&mut self, baud: u32, format: FrameFormat) -> Result<(), UartError> {
        if baud == 0 {
            return Err(UartError::InvalidBaud(baud));
        }
        self.backend.apply_settings(baud, format)?;
        self.baud = baud;
        self.format = format;
        Ok(())
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn configuration(&self) -> (u32, FrameFormat) {
        (self.baud, self.format)
    }

    /// Non-blocking read of whatever the link has pending.
    pub fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, UartError> {
        let n = self.backend.read_available(buffer)?;
        self.total_rx = self.total_rx.wrapping_add(n as u64);
        Ok(n)
    }

    /// Write all of `data` to the link.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, UartError> {
        let mut written = 0;
        while written < data.len() {
            let n = self.backend.write_bytes(&data[written..])?;
            if n == 0 {
                break;
            }
            written += n;
        }
        self.total_tx = self.total_tx.wrapping_add(written as u64);
        Ok(written)
    }

    /// Relay the flow-control pause signal to the upstream transmitter.
    pub fn set_flow_paused(&mut self, paused: bool) -> Result<(), UartError> {
        self.backend.set_flow_paused(paused)
    }

    /// Cumulative bytes written to the UART.
    pub fn total_tx(&self) -> u64 {
        self.total_tx
    }

    /// Cumulative bytes read from the UART.
    pub fn total_rx(&self) -> u64 {
        self.total_rx
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }
}

impl std::fmt::Debug for UartChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UartChannel")
            .field("name", &self.backend.name())
            .field("baud", &self.baud)
            .field("format", &self.format.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::mock::MockUart;
    use crate::uart::traits::{DataBits, Parity, StopBits};

    fn channel_with_mock() -> (UartChannel, MockUart) {
        let mock = MockUart::new("MOCK0");
        let channel =
            UartChannel::new(Box::new(mock.clone()), 115200, FrameFormat::default()).unwrap();
        (channel, mock)
    }

    #[test]
    fn test_new_applies_initial_settings() {
        let (channel, mock) = channel_with_mock();
        assert_eq!(channel.baud(), 115200);
        assert_eq!(mock.settings(), Some((115200, FrameFormat::default())));
    }

    #[test]
    fn test_zero_baud_rejected() {
        let mock = MockUart::new("MOCK0");
        let result = UartChannel::new(Box::new(mock), 0, FrameFormat::default());
        assert!(matches!(result, Err(UartError::InvalidBaud(0))));
    }

    #[test]
    fn test_configure_updates_state() {
        let (mut channel, mock) = channel_with_mock();
        let format = FrameFormat {
            data_bits: DataBits::Seven,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
        };
        channel.configure(9600, format).unwrap();
        assert_eq!(channel.configuration(), (9600, format));
        assert_eq!(mock.settings(), Some((9600, format)));
    }

    #[test]
    fn test_rejected_configure_retains_previous() {
        let (mut channel, mock) = channel_with_mock();
        mock.set_reject_next_settings(true);
        let result = channel.configure(9600, FrameFormat::default());
        assert!(result.is_err());
        assert_eq!(channel.configuration(), (115200, FrameFormat::default()));
    }

    #[test]
    fn test_counters_increment_on_io() {
        let (mut channel, mock) = channel_with_mock();
        mock.feed_rx(b"hello");

        let mut buffer = [0u8; 16];
        let n = channel.read_available(&mut buffer).unwrap();
        assert_eq!(n, 5);
        assert_eq!(channel.total_rx(), 5);

        channel.write(b"ok").unwrap();
        assert_eq!(channel.total_tx(), 2);
        assert_eq!(mock.tx_bytes(), b"ok");
    }

    #[test]
    fn test_read_available_empty() {
        let (mut channel, _mock) = channel_with_mock();
        let mut buffer = [0u8; 16];
        assert_eq!(channel.read_available(&mut buffer).unwrap(), 0);
        assert_eq!(channel.total_rx(), 0);
    }
}

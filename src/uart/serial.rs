//! Host serial-port backend.
//!
//! Wraps the `serialport` crate behind the `UartBackend` trait. The pause
//! signal is software flow control: XOFF/XON bytes written onto the link,
//! which the connected device must honor for backpressure to have any effect.

use super::error::UartError;
use super::traits::{FrameFormat, StopBits, UartBackend};
use std::io::{Read, Write};
use std::time::Duration;

const XON: u8 = 0x11;
const XOFF: u8 = 0x13;

/// Serial UART backed by a real device node.
pub struct SerialUart {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialUart {
    /// Open a serial device with the given configuration.
    ///
    /// # Example
    /// ```no_run
    /// use uart_ws_bridge::uart::{FrameFormat, SerialUart};
    ///
    /// let uart = SerialUart::open("/dev/ttyUSB0", 115200, FrameFormat::default())?;
    /// # Ok::<(), uart_ws_bridge::uart::UartError>(())
    /// ```
    pub fn open(device: &str, baud: u32, format: FrameFormat) -> Result<Self, UartError> {
        let (data_bits, parity, stop_bits) = to_serialport(format)?;

        let port = serialport::new(device, baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(0))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => UartError::not_found(device),
                serialport::ErrorKind::InvalidInput => UartError::unsupported(e.to_string()),
                _ => UartError::Serial(e),
            })?;

        Ok(Self {
            port,
            name: device.to_string(),
        })
    }

    /// Get a reference to the underlying serialport implementation.
    pub fn as_raw(&self) -> &dyn serialport::SerialPort {
        &*self.port
    }
}

/// Map a frame format onto `serialport` types.
///
/// Zero and 1.5 stop bits exist on some UART silicon but not in the host
/// serial API; they are reported as unrepresentable before anything mutates.
fn to_serialport(
    format: FrameFormat,
) -> Result<(serialport::DataBits, serialport::Parity, serialport::StopBits), UartError> {
    use super::traits::{DataBits, Parity};

    let data_bits = match format.data_bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    };
    let parity = match format.parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    };
    let stop_bits = match format.stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
        StopBits::Zero | StopBits::OneAndHalf => {
            return Err(UartError::unsupported(format!(
                "{} stop bits not supported on this host",
                if format.stop_bits == StopBits::Zero { "0" } else { "1.5" }
            )));
        }
    };
    Ok((data_bits, parity, stop_bits))
}

impl UartBackend for SerialUart {
    fn apply_settings(&mut self, baud: u32, format: FrameFormat) -> Result<(), UartError> {
        // Representability check first, so a rejected format leaves the
        // device settings untouched.
        let (data_bits, parity, stop_bits) = to_serialport(format)?;

        self.port.set_baud_rate(baud)?;
        self.port.set_data_bits(data_bits)?;
        self.port.set_parity(parity)?;
        self.port.set_stop_bits(stop_bits)?;
        Ok(())
    }

    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, UartError> {
        let pending = self.port.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(0);
        }

        let want = pending.min(buffer.len());
        match self.port.read(&mut buffer[..want]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(UartError::Io(e)),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, UartError> {
        self.port.write(data).map_err(UartError::Io)
    }

    fn set_flow_paused(&mut self, paused: bool) -> Result<(), UartError> {
        let byte = if paused { XOFF } else { XON };
        self.port.write_all(&[byte]).map_err(UartError::Io)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialUart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialUart")
            .field("name", &self.name)
            .field("baud", &self.port.baud_rate().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::traits::{DataBits, Parity};

    #[test]
    fn test_device_not_found() {
        let result = SerialUart::open("/dev/nonexistent_uart_12345", 9600, FrameFormat::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_unrepresentable_stop_bits() {
        let format = FrameFormat {
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::OneAndHalf,
        };
        let result = to_serialport(format);
        assert!(matches!(result, Err(UartError::Unsupported(_))));

        let format = FrameFormat {
            stop_bits: StopBits::Zero,
            ..FrameFormat::default()
        };
        assert!(to_serialport(format).is_err());
    }

    #[test]
    fn test_representable_formats() {
        for stop_bits in [StopBits::One, StopBits::Two] {
            let format = FrameFormat {
                stop_bits,
                ..FrameFormat::default()
            };
            assert!(to_serialport(format).is_ok());
        }
    }
}

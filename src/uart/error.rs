//! UART-specific error types.

use thiserror::Error;

/// Errors that can occur on the UART side of the bridge.
#[derive(Debug, Error)]
pub enum UartError {
    /// The requested baud rate is not a positive, usable value.
    #[error("Invalid baud rate: {0}")]
    InvalidBaud(u32),

    /// The requested frame format cannot be represented by this backend.
    #[error("Frame format not representable: {0}")]
    Unsupported(String),

    /// The serial device was not found on the system.
    #[error("Serial device not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during UART operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl UartError {
    /// Create an Unsupported error from a message.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a NotFound error from a device path.
    pub fn not_found(device: impl Into<String>) -> Self {
        Self::NotFound(device.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UartError::not_found("/dev/ttyUSB0");
        assert_eq!(err.to_string(), "Serial device not found: /dev/ttyUSB0");

        let err = UartError::InvalidBaud(0);
        assert_eq!(err.to_string(), "Invalid baud rate: 0");

        let err = UartError::unsupported("1.5 stop bits");
        assert_eq!(err.to_string(), "Frame format not representable: 1.5 stop bits");
    }
}

//! Core traits and framing types for the UART layer.
//!
//! Defines the `UartBackend` trait that allows both real serial devices and
//! mock implementations to be used interchangeably, plus the frame-format
//! enums and their wire encodings.

use super::error::UartError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// The numeric value carried in `/stty` requests and responses.
    pub fn wire_code(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }

    /// Parse the wire value; anything outside 5..=8 is invalid.
    pub fn from_wire(code: i64) -> Option<Self> {
        match code {
            5 => Some(DataBits::Five),
            6 => Some(DataBits::Six),
            7 => Some(DataBits::Seven),
            8 => Some(DataBits::Eight),
            _ => None,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    /// Wire encoding: `null` = none, `0` = even, `1` = odd.
    pub fn wire_code(self) -> Option<u8> {
        match self {
            Parity::None => None,
            Parity::Even => Some(0),
            Parity::Odd => Some(1),
        }
    }

    /// Parse the wire value (`None` meaning the JSON `null`).
    pub fn from_wire(code: Option<i64>) -> Option<Self> {
        match code {
            None => Some(Parity::None),
            Some(0) => Some(Parity::Even),
            Some(1) => Some(Parity::Odd),
            Some(_) => None,
        }
    }
}

/// Number of stop bits.
///
/// The wire encoding follows the firmware convention: `0`, `1`, `15` (for
/// 1.5) and `2`, carried verbatim as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    Zero,
    One,
    OneAndHalf,
    Two,
}

impl StopBits {
    pub fn wire_code(self) -> u8 {
        match self {
            StopBits::Zero => 0,
            StopBits::One => 1,
            StopBits::OneAndHalf => 15,
            StopBits::Two => 2,
        }
    }

    pub fn from_wire(code: i64) -> Option<Self> {
        match code {
            0 => Some(StopBits::Zero),
            1 => Some(StopBits::One),
            15 => Some(StopBits::OneAndHalf),
            2 => Some(StopBits::Two),
            _ => None,
        }
    }
}

/// The UART frame format: data bits, parity and stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl fmt::Display for FrameFormat {
    /// Conventional shorthand, e.g. `8N1` or `7E1.5`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        let stop = match self.stop_bits {
            StopBits::Zero => "0",
            StopBits::One => "1",
            StopBits::OneAndHalf => "1.5",
            StopBits::Two => "2",
        };
        write!(f, "{}{}{}", self.data_bits.wire_code(), parity, stop)
    }
}

/// Trait for UART I/O operations.
///
/// This trait abstracts over the physical link, allowing both real serial
/// devices and mock implementations for testing. All operations are
/// non-blocking: `read_available` returns whatever is buffered (possibly
/// nothing) and never waits for data.
pub trait UartBackend: Send + std::fmt::Debug {
    /// Apply baud rate and frame format to the link.
    ///
    /// Must be fail-closed: if the format is not representable the backend
    /// returns an error without changing the link's settings.
    fn apply_settings(&mut self, baud: u32, format: FrameFormat) -> Result<(), UartError>;

    /// Read whatever bytes are currently available into `buffer`.
    ///
    /// Returns the number of bytes read; `0` when nothing is pending.
    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize, UartError>;

    /// Write bytes to the link, returning how many were accepted.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, UartError>;

    /// Assert or release the pause signal toward the upstream transmitter.
    fn set_flow_paused(&mut self, paused: bool) -> Result<(), UartError>;

    /// Get the name/path of this UART.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_is_8n1() {
        let format = FrameFormat::default();
        assert_eq!(format.data_bits, DataBits::Eight);
        assert_eq!(format.parity, Parity::None);
        assert_eq!(format.stop_bits, StopBits::One);
        assert_eq!(format.to_string(), "8N1");
    }

    #[test]
    fn test_data_bits_wire_round_trip() {
        for code in 5..=8 {
            let bits = DataBits::from_wire(code).unwrap();
            assert_eq!(i64::from(bits.wire_code()), code);
        }
        assert!(DataBits::from_wire(9).is_none());
        assert!(DataBits::from_wire(4).is_none());
    }

    #[test]
    fn test_parity_wire_codes() {
        assert_eq!(Parity::from_wire(None), Some(Parity::None));
        assert_eq!(Parity::from_wire(Some(0)), Some(Parity::Even));
        assert_eq!(Parity::from_wire(Some(1)), Some(Parity::Odd));
        assert_eq!(Parity::from_wire(Some(2)), None);
        assert_eq!(Parity::None.wire_code(), None);
    }

    #[test]
    fn test_stop_bits_wire_codes() {
        assert_eq!(StopBits::from_wire(15), Some(StopBits::OneAndHalf));
        assert_eq!(StopBits::OneAndHalf.wire_code(), 15);
        assert_eq!(StopBits::from_wire(3), None);
    }

    #[test]
    fn test_format_display() {
        let format = FrameFormat {
            data_bits: DataBits::Seven,
            parity: Parity::Even,
            stop_bits: StopBits::OneAndHalf,
        };
        assert_eq!(format.to_string(), "7E1.5");
    }
}

//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! The built-in defaults reproduce the firmware's tuning: a 10 KiB receive
//! buffer, 1536-byte send chunks, 500 ms flow-control stop ceilings and a
//! 10 s autobaud budget.

use super::error::{ConfigError, ConfigResult};
use crate::autobaud::{AutobaudConfig, DEFAULT_CANDIDATES};
use crate::engine::{BroadcastConfig, EngineConfig, FlowConfig, RegistryConfig};
use crate::uart::{DataBits, FrameFormat, Parity, StopBits};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,
    /// UART link configuration
    pub uart: UartConfig,
    /// Buffering and broadcast tuning
    pub buffering: BufferingConfig,
    /// Flow-control watermarks
    pub flow: FlowSection,
    /// Viewer limits and liveness
    pub clients: ClientsConfig,
    /// Baud-rate auto-detection
    pub autobaud: AutobaudSection,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port number for the HTTP/WebSocket server
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7681,
        }
    }
}

/// UART link configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub device: String,
    /// Initial baud rate
    pub baud: u32,
    /// Data bits: "five" | "six" | "seven" | "eight"
    pub data_bits: DataBits,
    /// Parity: "none" | "even" | "odd"
    pub parity: Parity,
    /// Stop bits: "zero" | "one" | "one_and_half" | "two"
    pub stop_bits: StopBits,
    /// Probe for the baud rate at startup instead of trusting `baud`
    pub autobaud_on_start: bool,
    /// Engine tick interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            autobaud_on_start: false,
            poll_interval_ms: 1,
        }
    }
}

impl UartConfig {
    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat {
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Buffering and broadcast tuning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    /// Receive buffer capacity in bytes
    pub rx_buffer_size: usize,
    /// Maximum payload per broadcast frame
    pub send_chunk_size: usize,
    /// Upper bound on the baud-derived flush delay
    pub max_flush_delay_ms: u64,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            rx_buffer_size: 10240,
            send_chunk_size: 1536,
            max_flush_delay_ms: 5,
        }
    }
}

/// Flow-control watermark section.
///
/// Buffer watermarks are fill-oriented (stop when fill rises to the stop
/// watermark, resume when it falls back to the resume watermark); heap
/// watermarks are headroom-oriented (stop when free memory drops to the low
/// watermark, resume when it recovers to the high one).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSection {
    pub stop_fill_watermark: usize,
    pub resume_fill_watermark: usize,
    pub buffer_stop_max_ms: u64,
    pub heap_low_watermark: usize,
    pub heap_high_watermark: usize,
    pub heap_stop_max_ms: u64,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            stop_fill_watermark: 8704,
            resume_fill_watermark: 2304,
            buffer_stop_max_ms: 500,
            heap_low_watermark: 4096,
            heap_high_watermark: 10240,
            heap_stop_max_ms: 500,
        }
    }
}

/// Viewer limits and liveness section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientsConfig {
    /// Maximum concurrent viewers
    pub max_clients: usize,
    /// Idle time before a liveness probe, in seconds
    pub ping_interval_secs: u64,
    /// Grace period after a probe before forced removal, in seconds
    pub liveness_timeout_secs: u64,
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            max_clients: 3,
            ping_interval_secs: 300,
            liveness_timeout_secs: 10,
        }
    }
}

/// Baud-rate auto-detection section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutobaudSection {
    /// Candidate rates in probe order
    pub candidates: Vec<u32>,
    /// Observation window per candidate, in milliseconds
    pub attempt_interval_ms: u64,
    /// Overall session deadline, in milliseconds
    pub timeout_ms: u64,
    /// Minimum bytes an attempt must observe to be judged
    pub min_sample: usize,
}

impl Default for AutobaudSection {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.to_vec(),
            attempt_interval_ms: 100,
            timeout_ms: 10_000,
            min_sample: 8,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Config {
    /// Cross-field sanity checks that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.uart.baud == 0 {
            return Err(ConfigError::validation("uart.baud", "must be positive"));
        }
        if self.buffering.send_chunk_size == 0
            || self.buffering.send_chunk_size > self.buffering.rx_buffer_size
        {
            return Err(ConfigError::validation(
                "buffering.send_chunk_size",
                "must be positive and no larger than rx_buffer_size",
            ));
        }
        if self.flow.resume_fill_watermark >= self.flow.stop_fill_watermark {
            return Err(ConfigError::validation(
                "flow.resume_fill_watermark",
                "must be below stop_fill_watermark (the gap is the dead band)",
            ));
        }
        if self.flow.stop_fill_watermark > self.buffering.rx_buffer_size {
            return Err(ConfigError::validation(
                "flow.stop_fill_watermark",
                "must not exceed buffering.rx_buffer_size",
            ));
        }
        if self.flow.heap_low_watermark >= self.flow.heap_high_watermark {
            return Err(ConfigError::validation(
                "flow.heap_low_watermark",
                "must be below heap_high_watermark (the gap is the dead band)",
            ));
        }
        if self.clients.max_clients == 0 {
            return Err(ConfigError::validation(
                "clients.max_clients",
                "must admit at least one viewer",
            ));
        }
        if self.autobaud.candidates.iter().any(|&c| c == 0) {
            return Err(ConfigError::validation(
                "autobaud.candidates",
                "candidate rates must be positive",
            ));
        }
        Ok(())
    }

    /// Build the engine tunables from the loaded sections.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            rx_buffer_capacity: self.buffering.rx_buffer_size,
            broadcast: BroadcastConfig {
                chunk_size: self.buffering.send_chunk_size,
                max_flush_delay: Duration::from_millis(self.buffering.max_flush_delay_ms),
            },
            flow: FlowConfig {
                buffer_stop_fill: self.flow.stop_fill_watermark,
                buffer_resume_fill: self.flow.resume_fill_watermark,
                buffer_max_assert: Duration::from_millis(self.flow.buffer_stop_max_ms),
                memory_low_watermark: self.flow.heap_low_watermark,
                memory_high_watermark: self.flow.heap_high_watermark,
                memory_max_assert: Duration::from_millis(self.flow.heap_stop_max_ms),
            },
            registry: RegistryConfig {
                max_clients: self.clients.max_clients,
                ping_interval: Duration::from_secs(self.clients.ping_interval_secs),
                liveness_timeout: Duration::from_secs(self.clients.liveness_timeout_secs),
            },
            autobaud: AutobaudConfig {
                candidates: self.autobaud.candidates.clone(),
                attempt_window: Duration::from_millis(self.autobaud.attempt_interval_ms),
                overall_timeout: Duration::from_millis(self.autobaud.timeout_ms),
                min_sample: self.autobaud.min_sample,
            },
            stats_window: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 7681);
        assert_eq!(config.uart.baud, 115200);
        assert_eq!(config.buffering.rx_buffer_size, 10240);
        assert_eq!(config.clients.max_clients, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[flow]"));
        assert!(toml_str.contains("[autobaud]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [server]
            port = 8080

            [uart]
            device = "/dev/ttyAMA0"
            baud = 9600
            data_bits = "seven"
            parity = "even"

            [clients]
            max_clients = 6
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.uart.baud, 9600);
        assert_eq!(config.uart.data_bits, DataBits::Seven);
        assert_eq!(config.uart.parity, Parity::Even);
        assert_eq!(config.clients.max_clients, 6);
        // Defaults should still work
        assert_eq!(config.buffering.send_chunk_size, 1536);
    }

    #[test]
    fn test_validation_rejects_inverted_watermarks() {
        let mut config = Config::default();
        config.flow.resume_fill_watermark = 9000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.flow.heap_low_watermark = 20480;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_oversized_chunk() {
        let mut config = Config::default();
        config.buffering.send_chunk_size = 20480;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_translation() {
        let config = Config::default();
        let engine = config.engine_config();
        assert_eq!(engine.rx_buffer_capacity, 10240);
        assert_eq!(engine.broadcast.chunk_size, 1536);
        assert_eq!(engine.flow.buffer_stop_fill, 8704);
        assert_eq!(engine.registry.max_clients, 3);
        assert_eq!(engine.autobaud.overall_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_frame_format_from_uart_section() {
        let config = Config::default();
        assert_eq!(config.uart.frame_format(), FrameFormat::default());
    }
}

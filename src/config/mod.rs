//! Configuration module for uart-ws-bridge.
//!
//! This module provides TOML-based configuration with environment variable
//! overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of
//! priority):
//!
//! 1. `UART_BRIDGE_CONFIG` environment variable (explicit path)
//! 2. `./uart-bridge.toml` (current directory)
//! 3. `~/.config/uart-ws-bridge/uart-bridge.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\uart-ws-bridge\uart-bridge.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is: `UART_BRIDGE_<SECTION>_<KEY>`
//!
//! Examples:
//! - `UART_BRIDGE_SERVER_PORT=8080`
//! - `UART_BRIDGE_UART_DEVICE=/dev/ttyACM0`
//! - `UART_BRIDGE_UART_BAUD=9600`
//!
//! # Example
//!
//! ```rust,ignore
//! use uart_ws_bridge::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Listening on {}:{}", config.server.host, config.server.port);
//! println!("Bridging {}", config.uart.device);
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{resolve_config_path, ConfigLoader};
pub use schema::{
    AutobaudSection, BufferingConfig, ClientsConfig, Config, FlowSection, LogFormat,
    LoggingConfig, ServerConfig, UartConfig,
};

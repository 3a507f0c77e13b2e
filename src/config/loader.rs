//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "UART_BRIDGE";

/// Config file name
const CONFIG_FILE_NAME: &str = "uart-bridge.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "UART_BRIDGE_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `UART_BRIDGE_CONFIG` environment variable (explicit path)
    /// 2. `./uart-bridge.toml` (current directory)
    /// 3. `~/.config/uart-ws-bridge/uart-bridge.toml` (XDG on Linux/macOS)
    /// 4. `%APPDATA%\uart-ws-bridge\uart-bridge.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables can override config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        let _ = apply_env_overrides(&mut config);

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. XDG config directory (Linux/macOS) or APPDATA (Windows)
    if let Some(config_dir) = get_config_dir() {
        let app_config = config_dir.join("uart-ws-bridge").join(CONFIG_FILE_NAME);
        if app_config.exists() {
            return Some(app_config);
        }
    }

    // 4. No config file found - will use defaults
    None
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `UART_BRIDGE_<SECTION>_<KEY>`
/// For example:
/// - `UART_BRIDGE_SERVER_PORT=8080`
/// - `UART_BRIDGE_UART_DEVICE=/dev/ttyACM0`
/// - `UART_BRIDGE_UART_BAUD=9600`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Server overrides
    if let Ok(val) = std::env::var(format!("{}_SERVER_HOST", ENV_PREFIX)) {
        config.server.host = val;
    }
    if let Ok(val) = std::env::var(format!("{}_SERVER_PORT", ENV_PREFIX)) {
        config.server.port = val.parse().map_err(|_| {
            ConfigError::env_parse(format!("{}_SERVER_PORT", ENV_PREFIX), "Invalid port number")
        })?;
    }

    // UART overrides
    if let Ok(val) = std::env::var(format!("{}_UART_DEVICE", ENV_PREFIX)) {
        config.uart.device = val;
    }
    if let Ok(val) = std::env::var(format!("{}_UART_BAUD", ENV_PREFIX)) {
        config.uart.baud = val.parse().map_err(|_| {
            ConfigError::env_parse(format!("{}_UART_BAUD", ENV_PREFIX), "Invalid baud rate")
        })?;
    }

    // Client overrides
    if let Ok(val) = std::env::var(format!("{}_CLIENTS_MAX_CLIENTS", ENV_PREFIX)) {
        config.clients.max_clients = val.parse().map_err(|_| {
            ConfigError::env_parse(
                format!("{}_CLIENTS_MAX_CLIENTS", ENV_PREFIX),
                "Invalid client count",
            )
        })?;
    }

    // Logging overrides
    if let Ok(val) = std::env::var(format!("{}_LOGGING_LEVEL", ENV_PREFIX)) {
        config.logging.level = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_loader() {
        // Only asserts on fields no other test overrides via the environment.
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().uart.baud, 115200);
        assert_eq!(loader.config().uart.device, "/dev/ttyUSB0");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[uart]\ndevice = \"/dev/ttyS9\"\nbaud = 1500000\n\n[server]\nport = 8080"
        )
        .unwrap();

        let loader = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(loader.config().uart.device, "/dev/ttyS9");
        assert_eq!(loader.config().uart.baud, 1500000);
        assert_eq!(loader.config().server.port, 8080);
    }

    #[test]
    fn test_load_from_rejects_invalid_watermarks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[flow]\nstop_fill_watermark = 1000\nresume_fill_watermark = 2000"
        )
        .unwrap();

        assert!(ConfigLoader::load_from(file.path()).is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = ConfigLoader::load_from("/nonexistent/uart-bridge.toml");
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_env_override() {
        // Set environment variable
        std::env::set_var("UART_BRIDGE_SERVER_PORT", "9999");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().server.port, 9999);

        // Clean up
        std::env::remove_var("UART_BRIDGE_SERVER_PORT");
    }
}

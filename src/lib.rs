//! UART ⇄ WebSocket Bridge Library
//!
//! This library provides the bridging engine that turns a host (or a small
//! gateway device) into a network-attached serial console: bytes read from a
//! UART are fanned out to every connected WebSocket viewer, and bytes sent by
//! viewers are written back to the UART. The engine also owns the UART's
//! framing parameters and can auto-detect an unknown baud rate.
//!
//! # Modules
//!
//! - `config`: Configuration management with TOML support
//! - `error`: Unified error handling
//! - `uart`: UART abstraction layer (backends, framing types, counters)
//! - `engine`: The bridging engine (buffer, flow control, clients, protocol)
//! - `autobaud`: Baud-rate auto-detection state machine
//! - `rest_api`: HTTP handlers for `/stty` and `/stats`
//! - `websocket`: WebSocket glue feeding the engine event loop

pub mod autobaud;
pub mod config;
pub mod engine;
pub mod error;
pub mod rest_api;
pub mod uart;
pub mod websocket;

// Re-export commonly used types for convenience
pub use autobaud::{AutobaudDetector, AutobaudOutcome};
pub use engine::{
    Admission, BridgeEngine, ClientId, ClientRegistry, ClientSink, CommandMultiplexer,
    EngineConfig, EngineEvent, EngineHandle, FlowController, HysteresisLoop, MemoryProbe,
    MockClientSink, RxBuffer, SinkStatus, StatsSnapshot, StatsTracker, SttyError, SttyRequest,
};
pub use error::AppError;
pub use uart::{
    DataBits, FrameFormat, MockUart, Parity, SerialUart, StopBits, UartBackend, UartChannel,
    UartError,
};

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};

//! UART abstraction layer.
//!
//! Provides framing types, a backend trait for dependency injection, the
//! counter-tracking channel the engine talks to, and both a real
//! (`serialport`-backed) and a mock backend.

pub mod channel;
pub mod error;
pub mod mock;
pub mod serial;
pub mod traits;

pub use channel::UartChannel;
pub use error::UartError;
pub use mock::MockUart;
pub use serial::SerialUart;
pub use traits::*;

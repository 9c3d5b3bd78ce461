//! Driver for R4D8B08 / R4D3B16 RS485 relay boards.
//!
//! The boards speak Modbus RTU on a serial line. `RelayBoard` validates
//! arguments, builds the request for the configured dialect and runs it
//! through a `ModbusClient`, which owns the transport and serializes access.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod output;
pub mod utils;

// Re-export commonly used types
pub use config::{BoardConfig, Dialect, ParityConfig};
pub use devices::{RelayBoard, MAX_DELAY_SECONDS};
pub use modbus::{LogTraceSink, MemoryTraceSink, ModbusClient, SerialTransport, TraceSink, Transport};
pub use output::{ConsoleFormatter, CsvFormatter, JsonFormatter, StateFormatter};
pub use utils::error::{FrameError, RelayError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod client;
pub mod crc;
pub mod protocol;
pub mod trace;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use client::ModbusClient;
pub use crc::crc16_modbus;
pub use protocol::{
    decode_response, encode_read_coils, encode_write_multi_register, encode_write_single_coil,
    FunctionCode, RequestFrame, ResponseFrame,
};
pub use trace::{Direction, LogTraceSink, MemoryTraceSink, TraceEvent, TraceSink};
pub use transport::{SerialTransport, Transport};

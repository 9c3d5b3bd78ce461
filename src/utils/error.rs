use thiserror::Error;

/// A reply that failed validation. The board state is unknown after any of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    #[error("CRC checksum mismatch: calculated {expected:#06x}, received {received:#06x}")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("Slave address mismatch: expected {expected}, received {received}")]
    AddressMismatch { expected: u8, received: u8 },

    #[error("Unexpected function code: expected {expected:#04x}, received {received:#04x}")]
    FunctionMismatch { expected: u8, received: u8 },

    #[error("Modbus exception {0:#04x}: {name}", name = exception_name(*.0))]
    Exception(u8),

    #[error("Write acknowledgement does not echo the request")]
    EchoMismatch,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Standard Modbus exception names.
pub fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target device failed to respond",
        _ => "unknown exception",
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Range error: {0}")]
    RangeError(String),

    #[error("Invalid response: {0}")]
    FrameError(#[from] FrameError),

    #[error("Timeout: expected {expected} bytes, received {received}")]
    TimeoutError { expected: usize, received: usize },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Lock acquisition failed")]
    LockError,
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::TransportError(format!("IO error: {}", err))
    }
}

impl From<serialport::Error> for RelayError {
    fn from(err: serialport::Error) -> Self {
        RelayError::TransportError(format!("Serial port error: {}", err))
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for RelayError {
    fn from(err: toml::ser::Error) -> Self {
        RelayError::ConfigError(format!("TOML write error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_message_names_the_code() {
        let err = FrameError::Exception(0x02);
        assert_eq!(err.to_string(), "Modbus exception 0x02: illegal data address");
    }

    #[test]
    fn frame_errors_convert_into_relay_errors() {
        let err: RelayError = FrameError::EchoMismatch.into();
        assert!(matches!(err, RelayError::FrameError(FrameError::EchoMismatch)));
    }
}

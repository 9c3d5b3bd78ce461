use clap::ArgMatches;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::modbus::protocol::{MAX_READ_REGISTERS, MAX_WRITE_COILS};
use crate::utils::error::RelayError;

/// Highest slave address a Modbus RTU board may use.
pub const MAX_SLAVE_ADDRESS: u8 = 247;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Even,
    Odd,
}

impl std::str::FromStr for ParityConfig {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "even" | "e" => Ok(Self::Even),
            "odd" | "o" => Ok(Self::Odd),
            other => Err(RelayError::ConfigError(format!("Unknown parity: {}", other))),
        }
    }
}

/// How relay operations are put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Standard coil functions for set/read, vendor command words for the rest.
    #[default]
    Coils,
    /// Vendor command words for every write, holding registers for reads.
    Registers,
}

impl Dialect {
    /// Most channels one frame can read or write in this dialect.
    pub fn max_channels(self) -> u16 {
        match self {
            Self::Coils => MAX_WRITE_COILS,
            Self::Registers => MAX_READ_REGISTERS,
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coils" => Ok(Self::Coils),
            "registers" => Ok(Self::Registers),
            other => Err(RelayError::ConfigError(format!("Unknown dialect: {}", other))),
        }
    }
}

fn default_port() -> String {
    if cfg!(target_os = "windows") {
        "COM1"
    } else if cfg!(target_os = "macos") {
        "/dev/tty.usbserial-0001"
    } else {
        "/dev/ttyUSB0"
    }
    .to_string()
}

/// Board settings. Every field has a default so a config file only needs the
/// values that differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub port: String,
    pub slave_address: u8,
    pub channels: u16,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    pub read_timeout_ms: u64,
    pub close_after_each_call: bool,
    pub debug: bool,
    pub dialect: Dialect,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            slave_address: 1,
            channels: 16,
            baud_rate: 9600,
            parity: ParityConfig::None,
            read_timeout_ms: 200,
            close_after_each_call: false,
            debug: false,
            dialect: Dialect::Coils,
        }
    }
}

impl BoardConfig {
    pub fn new(port: &str, slave_address: u8) -> Self {
        Self {
            port: port.to_string(),
            slave_address,
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.slave_address > MAX_SLAVE_ADDRESS {
            return Err(RelayError::ConfigError(format!(
                "Slave address {} is outside 0-{}",
                self.slave_address, MAX_SLAVE_ADDRESS
            )));
        }
        if self.channels == 0 {
            return Err(RelayError::ConfigError("Board needs at least one channel".to_string()));
        }
        if self.channels > self.dialect.max_channels() {
            return Err(RelayError::ConfigError(format!(
                "{} channels exceed the {:?} dialect limit of {}",
                self.channels,
                self.dialect,
                self.dialect.max_channels()
            )));
        }
        if self.baud_rate == 0 {
            return Err(RelayError::ConfigError("Baud rate must be positive".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(RelayError::ConfigError("Read timeout must be positive".to_string()));
        }
        if self.port.trim().is_empty() {
            return Err(RelayError::ConfigError("Serial port name is empty".to_string()));
        }
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::ConfigError(format!("Cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: BoardConfig = toml::from_str(&content)?;
        debug!("Loaded board config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RelayError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Command line values override whatever the config file set.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), RelayError> {
        if let Some(port) = matches.get_one::<String>("port") {
            self.port = port.clone();
        }
        if let Some(address) = matches.get_one::<String>("address") {
            self.slave_address = parse_arg("address", address)?;
        }
        if let Some(channels) = matches.get_one::<String>("channels") {
            self.channels = parse_arg("channels", channels)?;
        }
        if let Some(baud) = matches.get_one::<String>("baud") {
            self.baud_rate = parse_arg("baud", baud)?;
        }
        if let Some(parity) = matches.get_one::<String>("parity") {
            self.parity = parity.parse()?;
        }
        if let Some(timeout) = matches.get_one::<String>("timeout-ms") {
            self.read_timeout_ms = parse_arg("timeout-ms", timeout)?;
        }
        if let Some(dialect) = matches.get_one::<String>("dialect") {
            self.dialect = dialect.parse()?;
        }
        if matches.get_flag("close-after-each-call") {
            self.close_after_each_call = true;
        }
        if matches.get_flag("debug") {
            self.debug = true;
        }
        Ok(())
    }
}

fn parse_arg<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, RelayError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RelayError::ConfigError(format!("Invalid --{} '{}': {}", name, value, e)))
}

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use super::relay_protocol::{RelayProtocol, RelayRequest};
use crate::config::settings::BoardConfig;
use crate::modbus::client::ModbusClient;
use crate::modbus::protocol::BROADCAST_ADDRESS;
use crate::modbus::trace::{LogTraceSink, TraceSink};
use crate::modbus::transport::{SerialTransport, Transport};
use crate::utils::error::{FrameError, RelayError};

/// Longest delay the one-byte command parameter can carry.
pub const MAX_DELAY_SECONDS: u32 = 255;

/// An R4D3B16 / R4D8B08 style relay board on an RS485 bus.
///
/// Relay state `true` is "open": COM connected to NO, LED on. `false` is the
/// rest state with COM connected to NC.
///
/// Every operation validates its arguments before anything is sent, performs a
/// single request/response exchange and reports failures as they are. Nothing
/// is retried.
pub struct RelayBoard {
    config: BoardConfig,
    protocol: RelayProtocol,
    client: ModbusClient,
    trace_sink: Arc<dyn TraceSink>,
}

impl RelayBoard {
    /// Sets up a board on the serial port named in `config`. The port itself is
    /// opened on the first call.
    pub fn new(config: BoardConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let transport = SerialTransport::new(&config.port, config.baud_rate, config.parity);
        Self::with_transport(config, Box::new(transport))
    }

    pub fn with_transport(config: BoardConfig, transport: Box<dyn Transport>) -> Result<Self, RelayError> {
        config.validate()?;

        let client = ModbusClient::new(transport, config.read_timeout(), config.baud_rate)
            .with_close_after_each_call(config.close_after_each_call);
        let protocol = RelayProtocol::new(config.slave_address, config.channels, config.dialect);

        info!(
            "Relay board: slave {} on {}, {} channels, {:?} dialect",
            config.slave_address, config.port, config.channels, config.dialect
        );

        let mut board = Self {
            config,
            protocol,
            client,
            trace_sink: Arc::new(LogTraceSink),
        };
        board.apply_debug();
        Ok(board)
    }

    /// Sends the frame trace to `sink` instead of the log. Frames are only
    /// traced while debug is enabled.
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self.apply_debug();
        self
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
        self.apply_debug();
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) -> Result<(), RelayError> {
        if read_timeout.is_zero() {
            return Err(RelayError::ConfigError("Read timeout must be positive".to_string()));
        }
        self.config.read_timeout_ms = read_timeout.as_millis() as u64;
        self.client.set_read_timeout(read_timeout);
        Ok(())
    }

    fn apply_debug(&mut self) {
        if self.config.debug {
            self.client.set_trace_sink(self.trace_sink.clone());
        } else {
            self.client.clear_trace_sink();
        }
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn slave_address(&self) -> u8 {
        self.config.slave_address
    }

    pub fn is_port_open(&self) -> bool {
        self.client.is_open()
    }

    /// Releases the serial port. The next call opens it again.
    pub fn close(&self) -> Result<(), RelayError> {
        self.client.close()
    }

    pub fn check_channel_number(&self, channel: u16) -> Result<(), RelayError> {
        if (1..=self.config.channels).contains(&channel) {
            Ok(())
        } else {
            Err(RelayError::RangeError(format!(
                "Invalid channel {}: board has channels 1-{}",
                channel, self.config.channels
            )))
        }
    }

    pub fn check_seconds(&self, seconds: u32) -> Result<u8, RelayError> {
        u8::try_from(seconds).map_err(|_| {
            RelayError::RangeError(format!(
                "Delay can only be 0-{} seconds, got {}",
                MAX_DELAY_SECONDS, seconds
            ))
        })
    }

    fn check_length(&self, start_channel: u16, length: u16) -> Result<(), RelayError> {
        let available = self.config.channels - start_channel + 1;
        if length == 0 || length > available {
            return Err(RelayError::RangeError(format!(
                "Invalid length {} from channel {}: at most {} channels available",
                length, start_channel, available
            )));
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<(), RelayError> {
        if self.config.slave_address == BROADCAST_ADDRESS {
            return Err(RelayError::ConfigError(
                "Relays cannot be read through the broadcast address 0".to_string(),
            ));
        }
        Ok(())
    }

    fn execute(&self, request: RelayRequest) -> Result<Vec<bool>, RelayError> {
        let payload = self.client.transact(&request.frame)?;
        Ok(self.protocol.interpret(&request, &payload)?)
    }

    pub fn open_relay(&self, channel: u16) -> Result<(), RelayError> {
        self.set_relay(channel, true)
    }

    pub fn close_relay(&self, channel: u16) -> Result<(), RelayError> {
        self.set_relay(channel, false)
    }

    pub fn set_relay(&self, channel: u16, state: bool) -> Result<(), RelayError> {
        self.check_channel_number(channel)?;
        debug!("Setting relay {} to {}", channel, if state { "open" } else { "closed" });
        self.execute(self.protocol.set_relay(channel, state))?;
        Ok(())
    }

    /// Self-locking: flips the relay's latched state.
    pub fn toggle(&self, channel: u16) -> Result<(), RelayError> {
        self.check_channel_number(channel)?;
        debug!("Toggling relay {}", channel);
        self.execute(self.protocol.toggle(channel))?;
        Ok(())
    }

    /// Inter-locking: how other relays react is defined by the board firmware.
    pub fn latch(&self, channel: u16) -> Result<(), RelayError> {
        self.check_channel_number(channel)?;
        debug!("Latching relay {}", channel);
        self.execute(self.protocol.latch(channel))?;
        Ok(())
    }

    /// Non-locking one second pulse. The board times the pulse itself, so this
    /// returns as soon as the command was acknowledged.
    pub fn momentary(&self, channel: u16) -> Result<(), RelayError> {
        self.check_channel_number(channel)?;
        debug!("Pulsing relay {}", channel);
        self.execute(self.protocol.momentary(channel))?;
        Ok(())
    }

    /// Opens the relay for `seconds` (0-255). Re-arms the timer when the relay
    /// is already open.
    pub fn delay(&self, channel: u16, seconds: u32) -> Result<(), RelayError> {
        self.check_channel_number(channel)?;
        let seconds = self.check_seconds(seconds)?;
        debug!("Opening relay {} for {}s", channel, seconds);
        self.execute(self.protocol.delay(channel, seconds))?;
        Ok(())
    }

    pub fn open_all(&self) -> Result<(), RelayError> {
        debug!("Opening all {} relays", self.config.channels);
        self.execute(self.protocol.open_all())?;
        Ok(())
    }

    pub fn close_all(&self) -> Result<(), RelayError> {
        debug!("Closing all {} relays", self.config.channels);
        self.execute(self.protocol.close_all())?;
        Ok(())
    }

    pub fn read_relay(&self, channel: u16) -> Result<bool, RelayError> {
        self.check_channel_number(channel)?;
        self.check_readable()?;
        let states = self.execute(self.protocol.read_relay(channel))?;
        states
            .first()
            .copied()
            .ok_or_else(|| FrameError::InvalidPayload("no relay state in reply".to_string()).into())
    }

    /// States of `length` relays, index 0 being `start_channel`.
    pub fn read_relays(&self, start_channel: u16, length: u16) -> Result<Vec<bool>, RelayError> {
        self.check_channel_number(start_channel)?;
        self.check_length(start_channel, length)?;
        self.check_readable()?;
        self.execute(self.protocol.read_relays(start_channel, length))
    }

    pub fn read_all_relays(&self) -> Result<Vec<bool>, RelayError> {
        self.read_relays(1, self.config.channels)
    }
}

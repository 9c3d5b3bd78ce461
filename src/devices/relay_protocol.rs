//! Relay operations expressed as Modbus requests.
//!
//! The boards understand a vendor command word written to register `channel`
//! (register 0 addresses every channel at once): the high byte selects the
//! command, the low byte carries its parameter. `Dialect` picks whether plain
//! set/read operations go through standard coil functions or through those
//! command registers. Nothing in here talks to the bus.

use crate::config::settings::Dialect;
use crate::modbus::protocol::{check_echo, decode_bits, decode_registers, RequestFrame};
use crate::utils::error::FrameError;

/// Register that addresses all channels for the broadcast commands.
pub const ALL_CHANNELS_REGISTER: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayCommand {
    Open = 0x01,
    Close = 0x02,
    /// Self-locking: flips the relay.
    Toggle = 0x03,
    /// Inter-locking: group behavior is up to the firmware.
    Latch = 0x04,
    /// Non-locking: the board opens the relay for one second by itself.
    Momentary = 0x05,
    /// Opens the relay for `parameter` seconds, re-armed if already open.
    Delay = 0x06,
    OpenAll = 0x07,
    CloseAll = 0x08,
}

impl RelayCommand {
    pub fn word(self, parameter: u8) -> u16 {
        ((self as u16) << 8) | parameter as u16
    }
}

/// What a valid reply to a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Echo,
    Coils(u16),
    Registers(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub frame: RequestFrame,
    pub reply: Reply,
}

impl RelayRequest {
    fn echo(frame: RequestFrame) -> Self {
        Self {
            frame,
            reply: Reply::Echo,
        }
    }
}

/// Builds requests for one board and interprets the replies. Arguments are
/// expected to be validated by the caller.
#[derive(Debug, Clone)]
pub struct RelayProtocol {
    slave_address: u8,
    channels: u16,
    dialect: Dialect,
}

impl RelayProtocol {
    pub fn new(slave_address: u8, channels: u16, dialect: Dialect) -> Self {
        Self {
            slave_address,
            channels,
            dialect,
        }
    }

    pub fn open_relay(&self, channel: u16) -> RelayRequest {
        self.set_relay(channel, true)
    }

    pub fn close_relay(&self, channel: u16) -> RelayRequest {
        self.set_relay(channel, false)
    }

    /// `true` energizes the relay (COM to NO).
    pub fn set_relay(&self, channel: u16, state: bool) -> RelayRequest {
        match self.dialect {
            Dialect::Coils => RelayRequest::echo(RequestFrame::write_single_coil(
                self.slave_address,
                channel,
                state,
            )),
            Dialect::Registers => {
                let command = if state { RelayCommand::Open } else { RelayCommand::Close };
                self.command(channel, command, 0)
            }
        }
    }

    pub fn toggle(&self, channel: u16) -> RelayRequest {
        self.command(channel, RelayCommand::Toggle, 0)
    }

    pub fn latch(&self, channel: u16) -> RelayRequest {
        self.command(channel, RelayCommand::Latch, 0)
    }

    pub fn momentary(&self, channel: u16) -> RelayRequest {
        self.command(channel, RelayCommand::Momentary, 0)
    }

    pub fn delay(&self, channel: u16, seconds: u8) -> RelayRequest {
        let word = RelayCommand::Delay.word(seconds);
        match self.dialect {
            Dialect::Coils => RelayRequest::echo(RequestFrame::write_multiple_registers(
                self.slave_address,
                channel,
                &[word],
            )),
            Dialect::Registers => RelayRequest::echo(RequestFrame::write_single_register(
                self.slave_address,
                channel,
                word,
            )),
        }
    }

    pub fn open_all(&self) -> RelayRequest {
        self.set_all(true)
    }

    pub fn close_all(&self) -> RelayRequest {
        self.set_all(false)
    }

    fn set_all(&self, state: bool) -> RelayRequest {
        match self.dialect {
            Dialect::Coils => {
                let states = vec![state; self.channels as usize];
                RelayRequest::echo(RequestFrame::write_multiple_coils(self.slave_address, 1, &states))
            }
            Dialect::Registers => {
                let command = if state { RelayCommand::OpenAll } else { RelayCommand::CloseAll };
                self.command(ALL_CHANNELS_REGISTER, command, 0)
            }
        }
    }

    pub fn read_relay(&self, channel: u16) -> RelayRequest {
        self.read_relays(channel, 1)
    }

    pub fn read_relays(&self, start_channel: u16, length: u16) -> RelayRequest {
        match self.dialect {
            Dialect::Coils => RelayRequest {
                frame: RequestFrame::read_coils(self.slave_address, start_channel, length),
                reply: Reply::Coils(length),
            },
            Dialect::Registers => RelayRequest {
                frame: RequestFrame::read_holding_registers(self.slave_address, start_channel, length),
                reply: Reply::Registers(length),
            },
        }
    }

    pub fn read_all_relays(&self) -> RelayRequest {
        self.read_relays(1, self.channels)
    }

    /// Turns a validated reply payload into relay states, index 0 being the
    /// first requested channel. Writes yield no states.
    pub fn interpret(&self, request: &RelayRequest, payload: &[u8]) -> Result<Vec<bool>, FrameError> {
        match request.reply {
            Reply::Echo if request.frame.is_broadcast() => Ok(Vec::new()),
            Reply::Echo => {
                check_echo(&request.frame, payload)?;
                Ok(Vec::new())
            }
            Reply::Coils(count) => decode_bits(payload, count),
            Reply::Registers(count) => Ok(decode_registers(payload, count)?
                .into_iter()
                .map(|value| value == 1)
                .collect()),
        }
    }

    fn command(&self, register: u16, command: RelayCommand, parameter: u8) -> RelayRequest {
        RelayRequest::echo(RequestFrame::write_single_register(
            self.slave_address,
            register,
            command.word(parameter),
        ))
    }
}

//! In-memory transports for exercising the client and the board without hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::crc::{append_crc, crc16_modbus};
use super::protocol::{pack_bits, EXCEPTION_FLAG, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS};
use super::transport::Transport;
use crate::utils::error::RelayError;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

enum Responder {
    /// One entry per written frame; `None` stays silent.
    Scripted(VecDeque<Option<Vec<u8>>>),
    Board(SimulatedBoard),
}

/// Answers like an R4D3B16: coils and command registers over the same relays.
struct SimulatedBoard {
    address: u8,
    relays: Vec<bool>,
    exception: Option<u8>,
}

impl SimulatedBoard {
    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request.len() < 4 || crc16_modbus(request) != 0 {
            return None;
        }

        let address = request[0];
        if address != self.address && address != 0 {
            return None;
        }

        let function = request[1];
        let body = &request[2..request.len() - 2];
        let result = match self.exception {
            Some(code) => Err(code),
            None => self.apply(function, body),
        };

        if address == 0 {
            return None;
        }

        let mut reply = vec![self.address];
        match result {
            Ok(data) => {
                reply.push(function);
                reply.extend_from_slice(&data);
            }
            Err(code) => {
                reply.push(function | EXCEPTION_FLAG);
                reply.push(code);
            }
        }
        append_crc(&mut reply);
        Some(reply)
    }

    fn apply(&mut self, function: u8, body: &[u8]) -> Result<Vec<u8>, u8> {
        let word = |i: usize| {
            body.get(i..i + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or(ILLEGAL_DATA_VALUE)
        };
        let start = word(0)?;
        let value = word(2)?;

        match function {
            0x01 => {
                if value > MAX_READ_COILS {
                    return Err(ILLEGAL_DATA_VALUE);
                }
                let states = self.range(start, value)?;
                let packed = pack_bits(&states);
                let mut data = vec![packed.len() as u8];
                data.extend_from_slice(&packed);
                Ok(data)
            }
            0x03 => {
                if value > MAX_READ_REGISTERS {
                    return Err(ILLEGAL_DATA_VALUE);
                }
                let first = start.checked_sub(1).ok_or(ILLEGAL_DATA_ADDRESS)?;
                let states = self.range(first, value)?;
                let mut data = vec![(states.len() * 2) as u8];
                for state in states {
                    data.extend_from_slice(&(state as u16).to_be_bytes());
                }
                Ok(data)
            }
            0x05 => {
                let state = match value {
                    0xFF00 => true,
                    0x0000 => false,
                    _ => return Err(ILLEGAL_DATA_VALUE),
                };
                *self.relay_mut(start)? = state;
                Ok(body.to_vec())
            }
            0x06 => {
                self.command(start, value)?;
                Ok(body.to_vec())
            }
            0x0F => {
                let byte_count = *body.get(4).ok_or(ILLEGAL_DATA_VALUE)? as usize;
                let bits = body.get(5..).ok_or(ILLEGAL_DATA_VALUE)?;
                if value == 0
                    || value > MAX_WRITE_COILS
                    || byte_count != (value as usize + 7) / 8
                    || bits.len() != byte_count
                {
                    return Err(ILLEGAL_DATA_VALUE);
                }
                for i in 0..value {
                    let state = bits
                        .get(i as usize / 8)
                        .map(|byte| byte & (1 << (i % 8)) != 0)
                        .ok_or(ILLEGAL_DATA_VALUE)?;
                    *self.relay_mut(start + i)? = state;
                }
                Ok(body[..4].to_vec())
            }
            0x10 => {
                for i in 0..value {
                    let command = word(5 + i as usize * 2)?;
                    self.command(start + i, command)?;
                }
                Ok(body[..4].to_vec())
            }
            _ => Err(ILLEGAL_FUNCTION),
        }
    }

    fn command(&mut self, register: u16, word: u16) -> Result<(), u8> {
        let command = (word >> 8) as u8;
        if register == 0 {
            let state = match command {
                0x07 => true,
                0x08 => false,
                _ => return Err(ILLEGAL_DATA_ADDRESS),
            };
            self.relays.iter_mut().for_each(|relay| *relay = state);
            return Ok(());
        }

        let index = register - 1;
        match command {
            0x01 | 0x05 | 0x06 => *self.relay_mut(index)? = true,
            0x02 => *self.relay_mut(index)? = false,
            0x03 => {
                let relay = self.relay_mut(index)?;
                *relay = !*relay;
            }
            0x04 => {
                self.relay_mut(index)?;
                self.relays.iter_mut().for_each(|relay| *relay = false);
                *self.relay_mut(index)? = true;
            }
            _ => return Err(ILLEGAL_DATA_VALUE),
        }
        Ok(())
    }

    fn range(&self, first: u16, count: u16) -> Result<Vec<bool>, u8> {
        let first = first as usize;
        let end = first + count as usize;
        if count == 0 || end > self.relays.len() {
            return Err(ILLEGAL_DATA_ADDRESS);
        }
        Ok(self.relays[first..end].to_vec())
    }

    fn relay_mut(&mut self, index: u16) -> Result<&mut bool, u8> {
        self.relays.get_mut(index as usize).ok_or(ILLEGAL_DATA_ADDRESS)
    }
}

struct MockState {
    responder: Responder,
    written: Vec<Vec<u8>>,
    pending: VecDeque<u8>,
    open: bool,
    opens: usize,
    closes: usize,
    fail_open: bool,
    fail_writes: bool,
}

/// Cloneable handle; clones share state so a test can inspect what the client did.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn with_responder(responder: Responder) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                responder,
                written: Vec::new(),
                pending: VecDeque::new(),
                open: false,
                opens: 0,
                closes: 0,
                fail_open: false,
                fail_writes: false,
            })),
        }
    }

    /// A simulated board at `address` with every relay closed.
    pub fn board(address: u8, channels: u16) -> Self {
        Self::with_responder(Responder::Board(SimulatedBoard {
            address,
            relays: vec![false; channels as usize],
            exception: None,
        }))
    }

    pub fn scripted(replies: Vec<Option<Vec<u8>>>) -> Self {
        Self::with_responder(Responder::Scripted(replies.into()))
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn frames_sent(&self) -> usize {
        self.state.lock().unwrap().written.len()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    pub fn fail_open(&self) {
        self.state.lock().unwrap().fail_open = true;
    }

    /// Makes every write fail like an unplugged adapter until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn relays(&self) -> Vec<bool> {
        match &self.state.lock().unwrap().responder {
            Responder::Board(board) => board.relays.clone(),
            Responder::Scripted(_) => Vec::new(),
        }
    }

    pub fn set_relays(&self, states: &[bool]) {
        if let Responder::Board(board) = &mut self.state.lock().unwrap().responder {
            board.relays = states.to_vec();
        }
    }

    /// Makes the simulated board answer every request with an exception.
    pub fn respond_with_exception(&self, code: u8) {
        if let Responder::Board(board) = &mut self.state.lock().unwrap().responder {
            board.exception = Some(code);
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), RelayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(RelayError::TransportError("mock port unavailable".to_string()));
        }
        if !state.open {
            state.open = true;
            state.opens += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, RelayError> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(RelayError::TransportError("mock port is closed".to_string()));
        }
        if state.fail_writes {
            return Err(RelayError::TransportError("mock device disconnected".to_string()));
        }
        state.written.push(bytes.to_vec());

        let reply = match &mut state.responder {
            Responder::Scripted(replies) => replies.pop_front().flatten(),
            Responder::Board(board) => board.respond(bytes),
        };
        state.pending = reply.unwrap_or_default().into();
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, RelayError> {
        let mut state = self.state.lock().unwrap();
        if state.pending.is_empty() {
            drop(state);
            thread::sleep(timeout);
            return Ok(0);
        }

        let n = buf.len().min(state.pending.len());
        for (slot, byte) in buf.iter_mut().zip(state.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), RelayError> {
        self.state.lock().unwrap().pending.clear();
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> Vec<u8> {
        let mut frame = bytes.to_vec();
        append_crc(&mut frame);
        frame
    }

    fn board() -> SimulatedBoard {
        SimulatedBoard {
            address: 1,
            relays: vec![false; 16],
            exception: None,
        }
    }

    #[test]
    fn write_multiple_coils_byte_count_must_match_quantity() {
        let mut board = board();

        // 16 coils in 2 bytes
        let reply = board.respond(&frame(&[0x01, 0x0F, 0x00, 0x00, 0x00, 0x10, 0x02, 0xFF, 0xFF]));
        assert_eq!(reply, Some(frame(&[0x01, 0x0F, 0x00, 0x00, 0x00, 0x10])));
        assert_eq!(board.relays, vec![true; 16]);

        // wrapped byte count field
        let reply = board.respond(&frame(&[0x01, 0x0F, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00]));
        assert_eq!(reply, Some(frame(&[0x01, 0x8F, ILLEGAL_DATA_VALUE])));
        assert_eq!(board.relays, vec![true; 16]);
    }

    #[test]
    fn reads_above_protocol_limits_are_refused() {
        let mut board = SimulatedBoard {
            relays: vec![false; 2048],
            ..board()
        };
        let reply = board.respond(&frame(&[0x01, 0x01, 0x00, 0x00, 0x07, 0xD1]));
        assert_eq!(reply, Some(frame(&[0x01, 0x81, ILLEGAL_DATA_VALUE])));
        let reply = board.respond(&frame(&[0x01, 0x03, 0x00, 0x01, 0x00, 0x7E]));
        assert_eq!(reply, Some(frame(&[0x01, 0x83, ILLEGAL_DATA_VALUE])));
    }
}

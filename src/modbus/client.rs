use log::{debug, error, warn};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::protocol::{decode_response, RequestFrame, EXCEPTION_FLAG, EXCEPTION_FRAME_LEN};
use super::trace::{Direction, TraceEvent, TraceSink};
use super::transport::Transport;
use crate::utils::error::RelayError;

/// Above 19200 baud the RTU inter-frame gap is fixed.
const MIN_SILENT_INTERVAL: Duration = Duration::from_micros(1750);

/// 3.5 characters of 11 bits each.
pub fn silent_interval(baud_rate: u32) -> Duration {
    if baud_rate > 19_200 || baud_rate == 0 {
        MIN_SILENT_INTERVAL
    } else {
        Duration::from_micros(38_500_000 / baud_rate as u64)
    }
}

struct Link {
    transport: Box<dyn Transport>,
    last_frame_at: Option<Instant>,
}

impl Link {
    fn wait_silent_interval(&self, interval: Duration) {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }
}

/// Modbus RTU master for one transport.
///
/// The transport is either Closed or Open. Every call opens it if needed and,
/// with `close_after_each_call`, closes it again once the exchange finished,
/// whether it succeeded or not. The mutex serializes exchanges: the bus is
/// half-duplex and a second request before the first reply corrupts framing.
pub struct ModbusClient {
    link: Mutex<Link>,
    read_timeout: Duration,
    silent_interval: Duration,
    close_after_each_call: bool,
    trace: Option<Arc<dyn TraceSink>>,
}

impl ModbusClient {
    pub fn new(transport: Box<dyn Transport>, read_timeout: Duration, baud_rate: u32) -> Self {
        Self {
            link: Mutex::new(Link {
                transport,
                last_frame_at: None,
            }),
            read_timeout,
            silent_interval: silent_interval(baud_rate),
            close_after_each_call: false,
            trace: None,
        }
    }

    pub fn with_close_after_each_call(mut self, close_after_each_call: bool) -> Self {
        self.close_after_each_call = close_after_each_call;
        self
    }

    pub fn set_trace_sink(&mut self, sink: Arc<dyn TraceSink>) {
        self.trace = Some(sink);
    }

    pub fn clear_trace_sink(&mut self) {
        self.trace = None;
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    pub fn is_open(&self) -> bool {
        self.link
            .lock()
            .map(|link| link.transport.is_open())
            .unwrap_or(false)
    }

    pub fn close(&self) -> Result<(), RelayError> {
        let mut link = self.link.lock().map_err(|_| RelayError::LockError)?;
        link.transport.close();
        Ok(())
    }

    /// Sends one request and returns the validated reply payload.
    ///
    /// Broadcast requests are not answered; they return an empty payload once written.
    pub fn transact(&self, request: &RequestFrame) -> Result<Vec<u8>, RelayError> {
        let mut link = self.link.lock().map_err(|_| RelayError::LockError)?;

        let result = self.exchange(&mut link, request);

        // A transport failure leaves the handle unusable; reopen on the next call.
        let broken = matches!(result, Err(RelayError::TransportError(_)));
        if self.close_after_each_call || broken {
            link.transport.close();
        }

        if let Err(ref e) = result {
            warn!("{} to slave {} failed: {}", request.function, request.slave_address, e);
        }
        result
    }

    fn exchange(&self, link: &mut Link, request: &RequestFrame) -> Result<Vec<u8>, RelayError> {
        if !link.transport.is_open() {
            link.transport.open()?;
        }

        link.wait_silent_interval(self.silent_interval);
        link.transport.clear_input()?;

        let bytes = request.to_bytes();
        debug!("📤 {} to slave {}: {}", request.function, request.slave_address, hex::encode_upper(&bytes));
        self.record(request.slave_address, Direction::Request, &bytes);

        let written = link.transport.write(&bytes)?;
        link.last_frame_at = Some(Instant::now());
        if written != bytes.len() {
            return Err(RelayError::TransportError(format!(
                "Short write: {} of {} bytes",
                written,
                bytes.len()
            )));
        }

        if request.is_broadcast() {
            debug!("Broadcast request, not waiting for a reply");
            return Ok(Vec::new());
        }

        let raw = self.read_response(link, request)?;
        link.last_frame_at = Some(Instant::now());

        let payload = decode_response(&raw, request.slave_address, request.function)?;
        Ok(payload.to_vec())
    }

    /// Accumulates reply bytes until a complete frame arrived or the read timeout expired.
    fn read_response(&self, link: &mut Link, request: &RequestFrame) -> Result<Vec<u8>, RelayError> {
        let mut expected = request.expected_response_len();
        let mut response = Vec::with_capacity(expected);
        let mut buffer = [0u8; 256];
        let deadline = Instant::now() + self.read_timeout;

        while response.len() < expected {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let wanted = (expected - response.len()).min(buffer.len());
            let n = link.transport.read(&mut buffer[..wanted], deadline - now)?;
            response.extend_from_slice(&buffer[..n]);

            if response.len() >= 2 && response[1] & EXCEPTION_FLAG != 0 {
                expected = EXCEPTION_FRAME_LEN;
                response.truncate(expected);
            }
        }

        if !response.is_empty() {
            self.record(request.slave_address, Direction::Response, &response);
        }

        if response.len() < expected {
            error!(
                "⏰ Response timeout from slave {}: {} of {} bytes",
                request.slave_address,
                response.len(),
                expected
            );
            return Err(RelayError::TimeoutError {
                expected,
                received: response.len(),
            });
        }

        debug!("📥 Reply from slave {}: {}", request.slave_address, hex::encode_upper(&response));
        Ok(response)
    }

    fn record(&self, slave_address: u8, direction: Direction, bytes: &[u8]) {
        if let Some(sink) = &self.trace {
            sink.record(&TraceEvent::new(slave_address, direction, bytes));
        }
    }
}

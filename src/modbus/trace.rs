use chrono::{DateTime, Utc};
use log::info;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// One frame as it crossed the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub slave_address: u8,
    pub direction: Direction,
    pub bytes: Vec<u8>,
}

impl TraceEvent {
    pub fn new(slave_address: u8, direction: Direction, bytes: &[u8]) -> Self {
        Self {
            timestamp: Utc::now(),
            slave_address,
            direction,
            bytes: bytes.to_vec(),
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::Request => "📤 TX",
            Direction::Response => "📥 RX",
        };
        write!(
            f,
            "{} {} slave {}: [{}] ({} bytes)",
            self.timestamp.format("%H:%M:%S%.3f"),
            arrow,
            self.slave_address,
            hex::encode_upper(&self.bytes),
            self.bytes.len()
        )
    }
}

/// Receives every frame the client sends and every reply it reads.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent);
}

/// Writes frames through the `log` facade.
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&self, event: &TraceEvent) {
        info!(target: "relay_trace", "{}", event);
    }
}

/// Keeps frames in memory, in order.
#[derive(Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, event: &TraceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

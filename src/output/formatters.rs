use chrono::{DateTime, Utc};

/// Relay states read in one call, index 0 being `start_channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub slave_address: u8,
    pub start_channel: u16,
    pub states: Vec<bool>,
    pub timestamp: DateTime<Utc>,
}

impl RelaySnapshot {
    pub fn new(slave_address: u8, start_channel: u16, states: Vec<bool>) -> Self {
        Self {
            slave_address,
            start_channel,
            states,
            timestamp: Utc::now(),
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = (u16, bool)> + '_ {
        self.states
            .iter()
            .enumerate()
            .map(move |(i, state)| (self.start_channel + i as u16, *state))
    }

    /// Channels whose state differs from `previous`, same range assumed.
    pub fn changes_since(&self, previous: &RelaySnapshot) -> Vec<(u16, bool)> {
        self.channels()
            .zip(previous.states.iter())
            .filter(|((_, now), before)| now != *before)
            .map(|(change, _)| change)
            .collect()
    }
}

fn state_name(state: bool) -> &'static str {
    if state {
        "open"
    } else {
        "closed"
    }
}

pub trait StateFormatter: Send + Sync {
    fn format_snapshot(&self, snapshot: &RelaySnapshot) -> String;
    fn format_change(&self, slave_address: u8, channel: u16, state: bool) -> String;
    fn format_header(&self) -> String;
}

pub struct ConsoleFormatter;

impl StateFormatter for ConsoleFormatter {
    fn format_snapshot(&self, snapshot: &RelaySnapshot) -> String {
        let mut output = format!("🔹 Board {} relays:\n", snapshot.slave_address);
        for (channel, state) in snapshot.channels() {
            let led = if state { "●" } else { "○" };
            output.push_str(&format!("  {:>3} {} {}\n", channel, led, state_name(state)));
        }
        output
    }

    fn format_change(&self, slave_address: u8, channel: u16, state: bool) -> String {
        format!(
            "🔄 {} board {} relay {} -> {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            slave_address,
            channel,
            state_name(state)
        )
    }

    fn format_header(&self) -> String {
        format!("🚀 RS485 Relay Board - {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

pub struct JsonFormatter;

impl StateFormatter for JsonFormatter {
    fn format_snapshot(&self, snapshot: &RelaySnapshot) -> String {
        let relays: Vec<serde_json::Value> = snapshot
            .channels()
            .map(|(channel, state)| serde_json::json!({ "channel": channel, "open": state }))
            .collect();

        let result = serde_json::json!({
            "slave_address": snapshot.slave_address,
            "timestamp": snapshot.timestamp.to_rfc3339(),
            "relays": relays
        });

        let mut output = serde_json::to_string_pretty(&result).unwrap_or_default();
        output.push('\n');
        output
    }

    fn format_change(&self, slave_address: u8, channel: u16, state: bool) -> String {
        let change = serde_json::json!({
            "slave_address": slave_address,
            "channel": channel,
            "open": state,
            "timestamp": Utc::now().to_rfc3339()
        });
        let mut output = change.to_string();
        output.push('\n');
        output
    }

    fn format_header(&self) -> String {
        String::new() // JSON doesn't need headers
    }
}

pub struct CsvFormatter;

impl StateFormatter for CsvFormatter {
    fn format_snapshot(&self, snapshot: &RelaySnapshot) -> String {
        let timestamp = snapshot.timestamp.to_rfc3339();
        snapshot
            .channels()
            .map(|(channel, state)| {
                format!("{},{},{},{}\n", snapshot.slave_address, channel, state as u8, timestamp)
            })
            .collect()
    }

    fn format_change(&self, slave_address: u8, channel: u16, state: bool) -> String {
        format!("{},{},{},{}\n", slave_address, channel, state as u8, Utc::now().to_rfc3339())
    }

    fn format_header(&self) -> String {
        "Board,Channel,Open,Timestamp\n".to_string()
    }
}

pub fn formatter_for(name: &str) -> Option<Box<dyn StateFormatter>> {
    match name {
        "console" => Some(Box::new(ConsoleFormatter)),
        "json" => Some(Box::new(JsonFormatter)),
        "csv" => Some(Box::new(CsvFormatter)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RelaySnapshot {
        RelaySnapshot::new(1, 3, vec![true, false, true])
    }

    #[test]
    fn snapshot_channels_start_at_start_channel() {
        let channels: Vec<_> = snapshot().channels().collect();
        assert_eq!(channels, vec![(3, true), (4, false), (5, true)]);
    }

    #[test]
    fn changes_since_lists_flipped_channels() {
        let before = snapshot();
        let after = RelaySnapshot::new(1, 3, vec![true, true, false]);
        assert_eq!(after.changes_since(&before), vec![(4, true), (5, false)]);
        assert!(before.changes_since(&before).is_empty());
    }

    #[test]
    fn console_lists_every_channel() {
        let output = ConsoleFormatter.format_snapshot(&snapshot());
        assert!(output.contains("Board 1"));
        assert!(output.contains("  3 ● open"));
        assert!(output.contains("  4 ○ closed"));
    }

    #[test]
    fn json_snapshot_is_parseable() {
        let output = JsonFormatter.format_snapshot(&snapshot());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["slave_address"], 1);
        assert_eq!(value["relays"][1]["channel"], 4);
        assert_eq!(value["relays"][1]["open"], false);
        assert_eq!(value["relays"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn csv_has_one_row_per_channel() {
        let output = CsvFormatter.format_snapshot(&snapshot());
        let rows: Vec<&str> = output.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("1,3,1,"));
        assert!(rows[1].starts_with("1,4,0,"));
        assert_eq!(CsvFormatter.format_header(), "Board,Channel,Open,Timestamp\n");
    }

    #[test]
    fn formatter_lookup() {
        assert!(formatter_for("json").is_some());
        assert!(formatter_for("csv").is_some());
        assert!(formatter_for("console").is_some());
        assert!(formatter_for("xml").is_none());
    }
}

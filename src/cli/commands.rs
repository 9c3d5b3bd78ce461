use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::devices::RelayBoard;
use crate::output::{RelaySnapshot, StateFormatter};
use crate::utils::error::RelayError;

fn channel_arg() -> Arg {
    Arg::new("channel")
        .help("Relay channel, starting at 1")
        .required(true)
        .value_parser(value_parser!(u16))
}

pub fn build_cli() -> Command {
    Command::new("relayctl")
        .version(crate::VERSION)
        .about("Control R4D8B08 / R4D3B16 relay boards over RS485 Modbus RTU")
        .arg(Arg::new("config").long("config").short('c').value_name("FILE").help("TOML board configuration"))
        .arg(Arg::new("port").long("port").short('p').value_name("PORT").help("Serial port, e.g. /dev/ttyUSB0 or COM4"))
        .arg(Arg::new("address").long("address").short('a').value_name("ADDR").help("Slave address 0-247"))
        .arg(Arg::new("channels").long("channels").value_name("N").help("Number of relay channels"))
        .arg(Arg::new("baud").long("baud").short('b').value_name("BAUD").help("Baud rate"))
        .arg(Arg::new("parity").long("parity").value_name("PARITY").help("none, even or odd"))
        .arg(Arg::new("timeout-ms").long("timeout-ms").value_name("MS").help("Read timeout per call"))
        .arg(Arg::new("dialect").long("dialect").value_name("DIALECT").help("coils or registers"))
        .arg(
            Arg::new("close-after-each-call")
                .long("close-after-each-call")
                .action(ArgAction::SetTrue)
                .help("Release the serial port after every call"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Trace every frame on the bus"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .short('f')
                .value_name("FORMAT")
                .default_value("console")
                .help("Output format: console, json or csv"),
        )
        .subcommand(Command::new("open").about("Open (energize) a relay").arg(channel_arg()))
        .subcommand(Command::new("close").about("Close (release) a relay").arg(channel_arg()))
        .subcommand(Command::new("toggle").about("Flip a relay (self-locking)").arg(channel_arg()))
        .subcommand(Command::new("latch").about("Latch a relay (inter-locking)").arg(channel_arg()))
        .subcommand(Command::new("momentary").about("Pulse a relay for one second").arg(channel_arg()))
        .subcommand(
            Command::new("delay")
                .about("Open a relay for a number of seconds")
                .arg(channel_arg())
                .arg(
                    Arg::new("seconds")
                        .help("0-255 seconds")
                        .required(true)
                        .value_parser(value_parser!(u32)),
                ),
        )
        .subcommand(Command::new("open-all").about("Open every relay"))
        .subcommand(Command::new("close-all").about("Close every relay"))
        .subcommand(Command::new("read").about("Read one relay").arg(channel_arg()))
        .subcommand(
            Command::new("read-range")
                .about("Read consecutive relays")
                .arg(
                    Arg::new("start")
                        .required(true)
                        .value_parser(value_parser!(u16)),
                )
                .arg(
                    Arg::new("length")
                        .required(true)
                        .value_parser(value_parser!(u16)),
                ),
        )
        .subcommand(Command::new("read-all").about("Read every relay"))
        .subcommand(
            Command::new("watch")
                .about("Poll the board and print relay changes until Ctrl-C")
                .arg(
                    Arg::new("interval-ms")
                        .long("interval-ms")
                        .default_value("500")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("init-config")
                .about("Write a default configuration file")
                .arg(Arg::new("path").required(true)),
        )
}

/// Runs a blocking board call off the async runtime.
async fn run_blocking<T, F>(board: &Arc<RelayBoard>, op: F) -> Result<T>
where
    F: FnOnce(&RelayBoard) -> Result<T, RelayError> + Send + 'static,
    T: Send + 'static,
{
    let board = Arc::clone(board);
    let result = tokio::task::spawn_blocking(move || op(&board))
        .await
        .context("Relay task panicked")?;
    Ok(result?)
}

fn get<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("Missing argument: {}", id))
}

pub async fn handle_subcommands(
    matches: &ArgMatches,
    board: &Arc<RelayBoard>,
    formatter: &dyn StateFormatter,
) -> Result<bool> {
    let slave = board.slave_address();

    match matches.subcommand() {
        Some(("open", sub)) => {
            let channel: u16 = get(sub, "channel")?;
            run_blocking(board, move |b| b.open_relay(channel)).await?;
            println!("✅ Relay {} opened", channel);
        }
        Some(("close", sub)) => {
            let channel: u16 = get(sub, "channel")?;
            run_blocking(board, move |b| b.close_relay(channel)).await?;
            println!("✅ Relay {} closed", channel);
        }
        Some(("toggle", sub)) => {
            let channel: u16 = get(sub, "channel")?;
            run_blocking(board, move |b| b.toggle(channel)).await?;
            println!("✅ Relay {} toggled", channel);
        }
        Some(("latch", sub)) => {
            let channel: u16 = get(sub, "channel")?;
            run_blocking(board, move |b| b.latch(channel)).await?;
            println!("✅ Relay {} latched", channel);
        }
        Some(("momentary", sub)) => {
            let channel: u16 = get(sub, "channel")?;
            run_blocking(board, move |b| b.momentary(channel)).await?;
            println!("✅ Relay {} pulsed", channel);
        }
        Some(("delay", sub)) => {
            let channel: u16 = get(sub, "channel")?;
            let seconds: u32 = get(sub, "seconds")?;
            run_blocking(board, move |b| b.delay(channel, seconds)).await?;
            println!("✅ Relay {} opened for {}s", channel, seconds);
        }
        Some(("open-all", _)) => {
            run_blocking(board, |b| b.open_all()).await?;
            println!("✅ All relays opened");
        }
        Some(("close-all", _)) => {
            run_blocking(board, |b| b.close_all()).await?;
            println!("✅ All relays closed");
        }
        Some(("read", sub)) => {
            let channel: u16 = get(sub, "channel")?;
            let state = run_blocking(board, move |b| b.read_relay(channel)).await?;
            print!("{}", formatter.format_snapshot(&RelaySnapshot::new(slave, channel, vec![state])));
        }
        Some(("read-range", sub)) => {
            let start: u16 = get(sub, "start")?;
            let length: u16 = get(sub, "length")?;
            let states = run_blocking(board, move |b| b.read_relays(start, length)).await?;
            print!("{}", formatter.format_header());
            print!("{}", formatter.format_snapshot(&RelaySnapshot::new(slave, start, states)));
        }
        Some(("read-all", _)) => {
            let states = run_blocking(board, |b| b.read_all_relays()).await?;
            print!("{}", formatter.format_header());
            print!("{}", formatter.format_snapshot(&RelaySnapshot::new(slave, 1, states)));
        }
        Some(("watch", sub)) => {
            let interval_ms: u64 = get(sub, "interval-ms")?;
            watch(board, formatter, Duration::from_millis(interval_ms.max(1))).await?;
        }
        _ => return Ok(false),
    }

    Ok(true)
}

/// Prints the full state once, then only the channels that changed.
async fn watch(board: &Arc<RelayBoard>, formatter: &dyn StateFormatter, interval: Duration) -> Result<()> {
    let slave = board.slave_address();
    let mut ticker = tokio::time::interval(interval);
    let mut previous: Option<RelaySnapshot> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("👀 Watching board {} every {:?}", slave, interval);
    print!("{}", formatter.format_header());

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("🛑 Watch stopped");
                break;
            }
            _ = ticker.tick() => {
                let states = match run_blocking(board, |b| b.read_all_relays()).await {
                    Ok(states) => states,
                    Err(e) => {
                        warn!("Polling board {} failed: {}", slave, e);
                        continue;
                    }
                };

                let snapshot = RelaySnapshot::new(slave, 1, states);
                match &previous {
                    None => print!("{}", formatter.format_snapshot(&snapshot)),
                    Some(before) => {
                        for (channel, state) in snapshot.changes_since(before) {
                            print!("{}", formatter.format_change(slave, channel, state));
                        }
                    }
                }
                previous = Some(snapshot);
            }
        }
    }

    Ok(())
}

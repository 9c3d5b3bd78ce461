use anyhow::{Context, Result};
use std::sync::Arc;

use rs485_relay_board::cli::{build_cli, handle_subcommands};
use rs485_relay_board::config::BoardConfig;
use rs485_relay_board::devices::RelayBoard;
use rs485_relay_board::output::formatter_for;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let default_filter = if matches.get_flag("debug") { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if let Some(sub) = matches.subcommand_matches("init-config") {
        let path = sub
            .get_one::<String>("path")
            .context("Missing configuration path")?;
        BoardConfig::default().save_to_file(path)?;
        println!("✅ Default configuration written to {}", path);
        return Ok(());
    }

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => BoardConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => BoardConfig::default(),
    };
    config.apply_matches(&matches)?;

    let format = matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("console");
    let formatter = formatter_for(format).with_context(|| format!("Unknown output format: {}", format))?;

    let board = Arc::new(RelayBoard::new(config)?);

    if !handle_subcommands(&matches, &board, formatter.as_ref()).await? {
        build_cli().print_help()?;
        println!();
    }
    Ok(())
}

//! alert_send - write one alert level to the LED controller
//!
//! Bench tool for checking the controller wiring without a camera: connects
//! with the configured link settings, writes a single byte and exits.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use proximity_warner::{
    build_link_backend, AlertLevel, AlertTransmitter, LinkSupervisor, ProximityConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Level to send: none|green|yellow|red, or the wire byte 0-3.
    level: AlertLevel,
    /// Configuration file (JSON, or TOML when the extension is .toml).
    #[arg(long, env = "PROXIMITY_CONFIG")]
    config: Option<PathBuf>,
    /// Connect attempts before giving up.
    #[arg(long, default_value_t = 3)]
    attempts: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ProximityConfig::load_from(args.config.as_deref())?;
    config.link.connect_attempts = Some(args.attempts.max(1));

    let mut supervisor = LinkSupervisor::new(build_link_backend(&config.link)?, &config.link);
    let mut handle = supervisor
        .connect_until_ready(&AtomicBool::new(false))
        .ok_or_else(|| anyhow!("controller {} did not answer", config.link.peer_address))?;

    let transmitter = AlertTransmitter::new(config.link.characteristic_uuid.clone());
    let byte = transmitter.send(args.level, Some(&mut handle))?;
    println!("sent {} (byte {}) to {}", args.level, byte, handle.address());
    Ok(())
}

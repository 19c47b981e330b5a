//! # doom
//!
//! Drives the WebAssembly Doom module on a fixed-rate frame loop and relays
//! its frames and input over one of several transports.
//!
//! ## Modes
//!
//! - `local`: module from a file, frames to a PNG file.
//! - `store`: frames to an object store key, input polled from a key queue.
//! - `bus`: frames and input over NATS, with checkpoints carried between
//!   chained plays.
//! - `send-key`: the viewer side, sends one key event.

mod cli;
mod config;
mod hooks;
mod session;
mod store;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

/// Log filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "doom_app=info,doom_host=info,doom_net=info,doom::module=info";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Local(args) => session::run_local(args).await?,
        Command::Store(args) => session::run_store(args).await?,
        Command::Bus(args) => session::run_bus(args).await?,
        Command::SendKey(args) => session::send_key(args).await?,
    }

    info!("doom shut down");
    Ok(())
}

//! Command-line interface. Every option can also be set from the
//! environment.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use doom_net::connection::DEFAULT_NATS_URL;
use doom_net::subjects::DEFAULT_PREFIX;

#[derive(Debug, Parser)]
#[command(name = "doom", about = "Drive the WebAssembly Doom module on a fixed-rate frame loop")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run from a module file and write every frame to a PNG file.
    Local(LocalArgs),
    /// Publish frames to an object store and poll input from its key queue.
    Store(StoreArgs),
    /// Publish frames and receive input over NATS, checkpointing between
    /// chained plays.
    Bus(BusArgs),
    /// Send one key event to a running simulation.
    SendKey(SendKeyArgs),
}

#[derive(Debug, Clone, Args)]
pub struct TimingArgs {
    /// Target frame rate. Capped at the default of 25.
    #[arg(long, env = "DOOM_FRAMES_PER_SECOND")]
    pub fps: Option<u32>,

    /// How long one play lasts, in milliseconds.
    #[arg(long, env = "DOOM_PLAY_TIME_MS")]
    pub play_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// Use a directory as the store instead of NATS JetStream.
    #[arg(long, env = "DOOM_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = DEFAULT_NATS_URL)]
    pub nats_url: String,

    /// Object bucket holding the module, frames and checkpoints.
    #[arg(long, env = "DOOM_BUCKET_NAME", default_value = "doom")]
    pub bucket: String,

    /// Key-value bucket used as the input queue.
    #[arg(long, env = "DOOM_KEY_DB_TABLE_NAME", default_value = "doom-keys")]
    pub key_bucket: String,
}

#[derive(Debug, Clone, Args)]
pub struct ModuleArgs {
    /// Read the module from this file instead of the store.
    #[arg(long, env = "DOOM_WASM_PATH")]
    pub module: Option<PathBuf>,

    /// Store key of the module.
    #[arg(long, env = "DOOM_WASM_KEY", default_value = "doom.wasm")]
    pub module_key: String,
}

#[derive(Debug, Args)]
pub struct LocalArgs {
    /// Path to the module
    #[arg(long, env = "DOOM_WASM_PATH")]
    pub module: PathBuf,

    /// Where the latest frame is written.
    #[arg(long, short, default_value = "doom.png")]
    pub output: PathBuf,

    #[command(flatten)]
    pub timing: TimingArgs,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    #[command(flatten)]
    pub module: ModuleArgs,

    /// Store key every frame is written to.
    #[arg(long, env = "DOOM_FRAME_KEY", default_value = "doom-frame.png")]
    pub frame_key: String,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(flatten)]
    pub timing: TimingArgs,
}

#[derive(Debug, Args)]
pub struct BusArgs {
    #[command(flatten)]
    pub module: ModuleArgs,

    /// NATS subject prefix
    #[arg(long, env = "DOOM_SUBJECT_PREFIX", default_value = DEFAULT_PREFIX)]
    pub subject_prefix: String,

    /// Store key the checkpoint is read from and written to.
    #[arg(long, env = "DOOM_STATE_KEY_PREFIX", default_value = "doom-state-key")]
    pub state_key: String,

    /// Number of chained plays.
    #[arg(long, env = "DOOM_MAX_PLAYS", default_value_t = 3)]
    pub max_plays: u32,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(flatten)]
    pub timing: TimingArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyAction {
    Down,
    Up,
    /// Down followed by up.
    Press,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Via {
    Bus,
    Store,
}

#[derive(Debug, Args)]
pub struct SendKeyArgs {
    /// Browser `keyCode` of the key, e.g. 38 for the up arrow.
    pub key_code: i32,

    #[arg(long, value_enum, default_value_t = KeyAction::Press)]
    pub action: KeyAction,

    /// Send the code as is instead of translating it from the browser's key
    /// space.
    #[arg(long)]
    pub raw: bool,

    #[arg(long, value_enum, default_value_t = Via::Bus)]
    pub via: Via,

    /// NATS subject prefix
    #[arg(long, env = "DOOM_SUBJECT_PREFIX", default_value = DEFAULT_PREFIX)]
    pub subject_prefix: String,

    #[command(flatten)]
    pub backend: BackendArgs,
}

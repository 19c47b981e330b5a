//! Run modes.
//!
//! Each mode starts one simulation (or, for the bus, a chain of them), lets
//! it play until its time budget runs out or the process is interrupted,
//! and stops it cleanly.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use bytes::Bytes;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use doom_core::key::{timestamp_now, to_doom_key};
use doom_core::{DoomKey, KeyEvent};
use doom_host::{Doom, DoomHandle, RunHandle, RunOutcome, WasmLoader};
use doom_net::{FramePublisher, InputSubscriber, KeyQueue, NatsConnection, ObjectStore, bus, forward_keys};

use crate::cli::{BusArgs, KeyAction, LocalArgs, ModuleArgs, SendKeyArgs, StoreArgs, Via};
use crate::config::{self, CHECKPOINT_TIMEOUT, DEFAULT_PLAY_TIME, RunConfig};
use crate::hooks::{BusHook, PngFileHook, StoreFrameHook, load_checkpoint};
use crate::store::Store;

/// Why a play ended.
enum Ending {
    /// The loop stopped on its own.
    Finished(RunOutcome),
    PlayTimeUp,
    Interrupted,
}

/// Run from a module file, writing each frame to a PNG file.
pub async fn run_local(args: LocalArgs) -> Result<()> {
    let config = RunConfig::from_args(&args.timing, None)?;
    let module = read_module(&args.module).await?;
    let loader = compile_module(&module).await?;

    info!(output = %args.output.display(), "writing frames to file");
    let doom = Doom::new(loader, config.loop_config(), PngFileHook::new(args.output));
    let handle = doom.handle();
    let run = doom.start(&module).await?;

    let outcome = match race(&run, config.play_time).await {
        Ending::Finished(outcome) => outcome,
        Ending::PlayTimeUp | Ending::Interrupted => {
            handle.stop();
            run.wait().await
        }
    };
    finish(outcome).map(|_| ())
}

/// Polling-store deployment: frames go to one store key, input is drained
/// from the key queue once per frame interval.
pub async fn run_store(args: StoreArgs) -> Result<()> {
    let config = RunConfig::from_args(&args.timing, Some(DEFAULT_PLAY_TIME))?;
    let store = Arc::new(Store::open(&args.backend, None).await?);
    let module = load_module(&args.module, store.as_ref()).await?;
    let loader = compile_module(&module).await?;

    let hook = StoreFrameHook::new(store.clone(), args.frame_key.clone());
    let doom = Doom::new(loader, config.loop_config(), hook);
    let handle = doom.handle();
    let run = doom.start(&module).await?;
    let poller = tokio::spawn(poll_keys(store, handle.clone(), config.interval()));

    info!(frame_key = %args.frame_key, play_time = ?config.play_time, "playing");
    let outcome = match race(&run, config.play_time).await {
        Ending::Finished(outcome) => outcome,
        Ending::PlayTimeUp | Ending::Interrupted => {
            handle.stop();
            run.wait().await
        }
    };
    poller.abort();
    finish(outcome).map(|_| ())
}

/// Message-bus deployment: a chain of plays, each resuming from the
/// checkpoint the previous one persisted.
pub async fn run_bus(args: BusArgs) -> Result<()> {
    let config = RunConfig::from_args(&args.timing, Some(DEFAULT_PLAY_TIME))?;
    let max_plays = config::max_plays(args.max_plays)?;
    let connection = NatsConnection::connect_to(&args.backend.nats_url).await?;
    let store = Arc::new(Store::open(&args.backend, Some(&connection)).await?);
    let module = load_module(&args.module, store.as_ref()).await?;
    let loader = compile_module(&module).await?;

    for play in 1..=max_plays {
        info!(play, max_plays, "starting play");
        let interrupted = play_on_bus(&args, &config, &connection, &store, &loader, &module).await?;
        if interrupted {
            info!(play, "interrupted, not starting another play");
            break;
        }
    }

    info!(max_plays, "plays finished");
    Ok(())
}

/// One bus play. Returns whether it was interrupted.
async fn play_on_bus(
    args: &BusArgs,
    config: &RunConfig,
    connection: &NatsConnection,
    store: &Arc<Store>,
    loader: &WasmLoader,
    module: &[u8],
) -> Result<bool> {
    let publisher = FramePublisher::new(connection.clone(), &args.subject_prefix);
    let hook = BusHook::new(publisher, store.clone(), args.state_key.clone());
    let doom = Doom::new(loader.clone(), config.loop_config(), hook);
    let handle = doom.handle();

    if let Some(checkpoint) = load_checkpoint(store.as_ref(), &args.state_key).await {
        handle.request_load(checkpoint);
    }

    let run = doom.start(module).await?;
    let input = InputSubscriber::spawn(connection, &args.subject_prefix, handle.clone()).await?;

    let (outcome, interrupted) = match race(&run, config.play_time).await {
        Ending::Finished(outcome) => (outcome, false),
        Ending::PlayTimeUp => {
            info!("play time is up, checkpointing");
            checkpoint_and_stop(&handle).await;
            (run.wait().await, false)
        }
        Ending::Interrupted => {
            checkpoint_and_stop(&handle).await;
            (run.wait().await, true)
        }
    };
    input.abort();

    let frames = finish(outcome)?;
    info!(frames, "play finished");
    Ok(interrupted)
}

/// Send one key event to a running simulation.
pub async fn send_key(args: SendKeyArgs) -> Result<()> {
    let key_code = if args.raw {
        args.key_code
    } else {
        to_doom_key(args.key_code)
    };
    let events: &[KeyEvent] = match args.action {
        KeyAction::Down => &[KeyEvent::KeyDown],
        KeyAction::Up => &[KeyEvent::KeyUp],
        KeyAction::Press => &[KeyEvent::KeyDown, KeyEvent::KeyUp],
    };
    // Distinct timestamps keep down before up after the queue sorts them.
    let ts = timestamp_now();
    let keys: Vec<DoomKey> = events
        .iter()
        .enumerate()
        .map(|(i, &event)| DoomKey {
            ts: ts + i as f64,
            event,
            key_code,
        })
        .collect();

    match args.via {
        Via::Bus => {
            let connection = NatsConnection::connect_to(&args.backend.nats_url).await?;
            for key in &keys {
                bus::publish_key(&connection, &args.subject_prefix, key).await?;
            }
            connection.flush().await?;
        }
        Via::Store => {
            let store = Store::open(&args.backend, None).await?;
            for key in &keys {
                store.push(key).await?;
            }
        }
    }

    info!(key_code, events = keys.len(), via = ?args.via, "key sent");
    Ok(())
}

/// Wait for whichever comes first: the loop ending, the play time running
/// out or a shutdown signal.
async fn race(run: &RunHandle, play_time: Option<Duration>) -> Ending {
    tokio::select! {
        outcome = run.wait() => Ending::Finished(outcome),
        () = play_timer(play_time) => Ending::PlayTimeUp,
        () = shutdown_signal() => Ending::Interrupted,
    }
}

async fn play_timer(play_time: Option<Duration>) {
    match play_time {
        Some(play_time) => time::sleep(play_time).await,
        None => std::future::pending().await,
    }
}

async fn checkpoint_and_stop(handle: &DoomHandle) {
    match time::timeout(CHECKPOINT_TIMEOUT, handle.save_and_stop()).await {
        Ok(true) => {}
        Ok(false) => warn!("simulation ended before it could checkpoint"),
        Err(_) => {
            warn!(timeout_ms = CHECKPOINT_TIMEOUT.as_millis() as u64, "checkpoint timed out");
            handle.stop();
        }
    }
}

fn finish(outcome: RunOutcome) -> Result<u64> {
    match outcome {
        RunOutcome::Stopped { frames } => Ok(frames),
        RunOutcome::Failed { reason } => bail!("simulation failed: {reason}"),
    }
}

async fn load_module<S: ObjectStore>(args: &ModuleArgs, store: &S) -> Result<Bytes> {
    if let Some(path) = &args.module {
        return read_module(path).await;
    }
    let module = store
        .get(&args.module_key)
        .await?
        .with_context(|| format!("module `{}` not found in store", args.module_key))?;
    info!(key = %args.module_key, bytes = module.len(), "module loaded from store");
    Ok(module)
}

/// Compile the module off the async workers. The returned loader reuses the
/// compiled code for every instance, so chained plays compile once.
async fn compile_module(module: &Bytes) -> Result<WasmLoader> {
    let loader = WasmLoader::new();
    let compiler = loader.clone();
    let bytes = module.clone();
    tokio::task::spawn_blocking(move || compiler.compile(&bytes))
        .await
        .context("module compilation task failed")??;
    Ok(loader)
}

async fn read_module(path: &Path) -> Result<Bytes> {
    let module = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read module {}", path.display()))?;
    Ok(module.into())
}

/// Drain the key queue into the simulation once per frame interval.
async fn poll_keys<Q: KeyQueue>(queue: Arc<Q>, handle: DoomHandle, period: Duration) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while handle.is_running() {
        ticker.tick().await;
        if let Err(error) = forward_keys(queue.as_ref(), &handle).await {
            warn!(%error, "failed to poll queued input");
        }
    }
}

/// Resolves on Ctrl+C, or on SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, stopping"),
        () = terminate => info!("received terminate signal, stopping"),
    }
}

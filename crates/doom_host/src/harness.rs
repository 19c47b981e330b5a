//! The harness facade transports talk to.
//!
//! [`Doom`] owns the loader, the frame hook and the control state. Starting
//! it instantiates the module once and spawns the frame loop as a task;
//! [`DoomHandle`] is the cloneable control surface (input, stop, save, load)
//! handed to transports.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use tokio::sync::{OnceCell, mpsc, watch};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use doom_core::{Checkpoint, DoomKey, InputSink, key};

use crate::clock::SimClock;
use crate::error::HostError;
use crate::frame_loop::{FrameHook, FrameLoop, LoopConfig, LoopControl, input_queue};
use crate::host::Host;
use crate::module::ModuleLoader;

/// How a frame loop run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped { frames: u64 },
    Failed { reason: String },
}

/// Completion handle of the single frame loop run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: Uuid,
    outcome: watch::Receiver<Option<RunOutcome>>,
}

impl RunHandle {
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for the frame loop to end.
    pub async fn wait(&self) -> RunOutcome {
        let mut outcome = self.outcome.clone();
        match outcome.wait_for(Option::is_some).await {
            Ok(value) => Option::clone(&value).unwrap_or_else(|| RunOutcome::Failed {
                reason: "frame loop reported no outcome".to_string(),
            }),
            Err(_) => RunOutcome::Failed {
                reason: "frame loop task ended without reporting".to_string(),
            },
        }
    }
}

/// A simulation waiting to be started, or running.
pub struct Doom<L, H> {
    loader: L,
    config: LoopConfig,
    control: Arc<LoopControl>,
    input_tx: mpsc::Sender<DoomKey>,
    pending: Mutex<Option<(mpsc::Receiver<DoomKey>, H)>>,
    run: OnceCell<RunHandle>,
}

impl<L, H> Doom<L, H>
where
    L: ModuleLoader,
    H: FrameHook + 'static,
{
    #[must_use]
    pub fn new(loader: L, config: LoopConfig, hook: H) -> Self {
        let (input_tx, inputs) = input_queue();
        Self {
            loader,
            config,
            control: Arc::new(LoopControl::new()),
            input_tx,
            pending: Mutex::new(Some((inputs, hook))),
            run: OnceCell::new(),
        }
    }

    /// A control handle. Handles may be taken before [`start`](Self::start);
    /// input sent through them is dropped until the module is ready.
    #[must_use]
    pub fn handle(&self) -> DoomHandle {
        DoomHandle {
            control: self.control.clone(),
            inputs: self.input_tx.clone(),
        }
    }

    /// Instantiate the module, run its setup entry point and spawn the frame
    /// loop. Must be called inside a tokio runtime.
    ///
    /// Calling this again, concurrently or later, does not instantiate a
    /// second module: every caller receives the same [`RunHandle`].
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Instantiate`] or [`HostError::Trap`] if the module
    /// cannot be started. A later call may retry.
    pub async fn start(&self, module_bytes: &[u8]) -> Result<RunHandle, HostError> {
        if let Some(run) = self.run.get() {
            warn!(run_id = %run.run_id, "simulation already started");
            return Ok(run.clone());
        }
        self.run
            .get_or_try_init(|| async { self.launch(module_bytes) })
            .await
            .cloned()
    }

    fn launch(&self, module_bytes: &[u8]) -> Result<RunHandle, HostError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_none() {
            return Err(HostError::Instantiate(anyhow!("frame loop already launched")));
        }

        let host = Host::start(&self.loader, module_bytes, Arc::new(SimClock::new()))?;
        let Some((inputs, mut hook)) = pending.take() else {
            return Err(HostError::Instantiate(anyhow!("frame loop already launched")));
        };
        self.control.mark_ready();

        let mut frame_loop = FrameLoop::new(host, self.config.clone(), self.control.clone(), inputs);
        let run_id = Uuid::new_v4();
        let (outcome_tx, outcome) = watch::channel(None);

        tokio::spawn(
            async move {
                let outcome = match frame_loop.run(&mut hook).await {
                    Ok(frames) => RunOutcome::Stopped { frames },
                    Err(err) => {
                        error!(error = %err, "simulation failed");
                        RunOutcome::Failed {
                            reason: err.to_string(),
                        }
                    }
                };
                outcome_tx.send_replace(Some(outcome));
            }
            .instrument(info_span!("frame_loop", %run_id)),
        );

        info!(%run_id, "simulation running");
        Ok(RunHandle { run_id, outcome })
    }
}

/// Cloneable control surface of a [`Doom`].
#[derive(Debug, Clone)]
pub struct DoomHandle {
    control: Arc<LoopControl>,
    inputs: mpsc::Sender<DoomKey>,
}

impl DoomHandle {
    /// Queue an input event for delivery before the next step. Dropped with
    /// a warning if the module is not ready or the queue is full.
    pub fn send_key(&self, key: DoomKey) {
        if !self.control.is_ready() {
            warn!(
                event = ?key.event,
                key_code = key.key_code,
                "simulation not started, dropping input"
            );
            return;
        }
        if let Err(err) = self.inputs.try_send(key) {
            warn!(error = %err, key_code = key.key_code, "dropping input");
        }
    }

    /// Queue a press of `key_code`, stamped with the current wall-clock time.
    pub fn key_down(&self, key_code: i32) {
        self.send_key(DoomKey::down(key::timestamp_now(), key_code));
    }

    /// Queue a release of `key_code`, stamped with the current wall-clock time.
    pub fn key_up(&self, key_code: i32) {
        self.send_key(DoomKey::up(key::timestamp_now(), key_code));
    }

    /// Stop the frame loop once the current iteration finishes.
    pub fn stop(&self) {
        self.control.stop();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.control.is_ready()
    }

    /// Capture a checkpoint after the next step. The frame hook receives it.
    pub fn request_save(&self) {
        self.control.request_save();
    }

    /// Restore `checkpoint` after the next step.
    pub fn request_load(&self, checkpoint: Checkpoint) {
        self.control.request_load(checkpoint);
    }

    /// Request a checkpoint, wait until the loop has handed it to the frame
    /// hook, then stop. Returns `false` if the loop ended before saving.
    pub async fn save_and_stop(&self) -> bool {
        let mut saves = self.control.subscribe_saves();
        let mut finished = self.control.subscribe_finished();
        self.control.request_save();

        let saved = tokio::select! {
            biased;
            changed = saves.changed() => changed.is_ok(),
            _ = finished.wait_for(|done| *done) => false,
        };
        self.control.stop();
        saved
    }
}

impl InputSink for DoomHandle {
    fn send_key(&self, key: DoomKey) {
        DoomHandle::send_key(self, key);
    }
}

#[cfg(test)]
mod tests {
    use doom_core::KeyEvent;

    use super::*;
    use crate::testing::{FakeLoader, ModuleCall, RecordingHook};

    fn doom(loader: &FakeLoader, max_frames: u64) -> (Doom<FakeLoader, RecordingHook>, RecordingHook) {
        let hook = RecordingHook::default();
        let config = LoopConfig {
            max_frames,
            ..LoopConfig::default()
        };
        (Doom::new(loader.clone(), config, hook.clone()), hook)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_start_instantiates_once() {
        let loader = FakeLoader::with_pages(1);
        let (doom, _hook) = doom(&loader, 0);

        let (first, second) = tokio::join!(doom.start(b"fake"), doom.start(b"fake"));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(loader.instantiations(), 1);
        assert_eq!(first.run_id(), second.run_id());

        let third = doom.start(b"fake").await.unwrap();
        assert_eq!(third.run_id(), first.run_id());
        assert_eq!(loader.instantiations(), 1);

        doom.handle().stop();
        assert!(matches!(first.wait().await, RunOutcome::Stopped { .. }));
        assert!(matches!(second.wait().await, RunOutcome::Stopped { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_is_reported() {
        let loader = FakeLoader::failing();
        let (doom, _hook) = doom(&loader, 0);

        let result = doom.start(b"fake").await;

        assert!(matches!(result, Err(HostError::Instantiate(_))));
        assert!(!doom.handle().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_before_start_is_dropped() {
        let loader = FakeLoader::with_pages(1);
        let (doom, _hook) = doom(&loader, 2);
        let handle = doom.handle();

        handle.key_down(97);
        let run = doom.start(b"fake").await.unwrap();
        handle.key_up(98);
        run.wait().await;

        assert_eq!(
            loader.calls(),
            vec![
                ModuleCall::Init,
                ModuleCall::Input(KeyEvent::KeyUp, 98),
                ModuleCall::Advance(1),
                ModuleCall::Advance(2),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ends_after_frame_budget() {
        let loader = FakeLoader::with_pages(1);
        let (doom, hook) = doom(&loader, 5);

        let run = doom.start(b"fake").await.unwrap();

        assert_eq!(run.wait().await, RunOutcome::Stopped { frames: 5 });
        assert_eq!(hook.steps().len(), 5);
        assert!(!doom.handle().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_and_stop_hands_checkpoint_to_hook() {
        let loader = FakeLoader::with_pages(1);
        let (doom, hook) = doom(&loader, 0);
        let handle = doom.handle();
        let run = doom.start(b"fake").await.unwrap();

        assert!(handle.save_and_stop().await);
        let outcome = run.wait().await;

        assert!(matches!(outcome, RunOutcome::Stopped { .. }));
        assert_eq!(hook.checkpoints().len(), 1);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_and_stop_after_loop_ended() {
        let loader = FakeLoader::with_pages(1);
        let (doom, hook) = doom(&loader, 1);
        let handle = doom.handle();
        let run = doom.start(b"fake").await.unwrap();
        run.wait().await;

        assert!(!handle.save_and_stop().await);
        assert!(hook.checkpoints().is_empty());
    }
}

//! Fixed-rate frame loop.
//!
//! Each iteration:
//!
//! 1. Stop if the running flag was cleared.
//! 2. Deliver queued input events in arrival order.
//! 3. Step the simulation and copy out the frame it drew.
//! 4. Await the per-frame hook.
//! 5. Apply a pending save, then a pending load.
//! 6. Sleep out the rest of the frame interval, or log an overrun.
//!
//! The loop never skips steps to catch up. A sustained overrun lowers the
//! effective frame rate instead.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use doom_core::{Checkpoint, DoomKey, FrameBuffer};

use crate::error::HostError;
use crate::host::Host;
use crate::module::SimulationModule;

/// Default and maximum frame rate.
pub const DEFAULT_FRAMES_PER_SECOND: u32 = 25;

/// Input events buffered between two steps before new ones are dropped.
pub const INPUT_QUEUE_CAPACITY: usize = 256;

/// Configuration for the frame loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Target frames per second.
    pub frames_per_second: u32,
    /// Maximum number of frames to run (0 = unlimited).
    pub max_frames: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            max_frames: 0,
        }
    }
}

impl LoopConfig {
    /// The target time between the starts of two iterations.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.frames_per_second.max(1)
    }
}

/// What to do after an iteration that took `elapsed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Suspend for the rest of the interval.
    Sleep(Duration),
    /// The iteration used up its budget; start the next one immediately.
    Overrun(Duration),
}

#[must_use]
pub fn pace(interval: Duration, elapsed: Duration) -> Pace {
    if elapsed < interval {
        Pace::Sleep(interval - elapsed)
    } else {
        Pace::Overrun(elapsed)
    }
}

/// The result of one step, owned so it can cross an await point.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub frame_id: u64,
    pub frame: Option<FrameBuffer>,
}

/// Per-frame callback where transports render, publish or persist.
///
/// Implementations must not fail the loop: transport errors are logged and
/// swallowed inside the hook.
pub trait FrameHook: Send {
    fn on_step(&mut self, step: StepOutput) -> impl Future<Output = ()> + Send;

    /// Called with every checkpoint the loop captures on request.
    fn on_checkpoint(&mut self, checkpoint: Checkpoint) -> impl Future<Output = ()> + Send {
        async move {
            debug!(timestamp = checkpoint.timestamp, "checkpoint discarded");
        }
    }
}

/// Scheduler state shared between the loop and its controllers.
///
/// Every flag is consumed with a single check-and-clear, so a request made
/// twice before the loop sees it is applied once.
#[derive(Debug)]
pub struct LoopControl {
    running: AtomicBool,
    ready: AtomicBool,
    save_requested: AtomicBool,
    pending_load: Mutex<Option<Checkpoint>>,
    saves: watch::Sender<u64>,
    finished: watch::Sender<bool>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            save_requested: AtomicBool::new(false),
            pending_load: Mutex::new(None),
            saves: watch::Sender::new(0),
            finished: watch::Sender::new(false),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Let the current iteration finish and schedule no further step.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Whether the module has been instantiated and accepts input.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn request_save(&self) {
        self.save_requested.store(true, Ordering::Release);
    }

    fn take_save_request(&self) -> bool {
        self.save_requested.swap(false, Ordering::AcqRel)
    }

    /// Replace any load not yet applied.
    pub fn request_load(&self, checkpoint: Checkpoint) {
        *self
            .pending_load
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(checkpoint);
    }

    fn take_pending_load(&self) -> Option<Checkpoint> {
        self.pending_load
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Ticks once for every checkpoint the loop captured.
    #[must_use]
    pub fn subscribe_saves(&self) -> watch::Receiver<u64> {
        self.saves.subscribe()
    }

    /// Turns `true` once the loop has exited, for whatever reason.
    #[must_use]
    pub fn subscribe_finished(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }
}

/// Create the bounded queue feeding input events into a [`FrameLoop`].
#[must_use]
pub fn input_queue() -> (mpsc::Sender<DoomKey>, mpsc::Receiver<DoomKey>) {
    mpsc::channel(INPUT_QUEUE_CAPACITY)
}

/// The fixed-rate scheduler. Owns the host, so nothing else can touch
/// simulation memory while it runs.
pub struct FrameLoop<M> {
    host: Host<M>,
    config: LoopConfig,
    control: Arc<LoopControl>,
    inputs: mpsc::Receiver<DoomKey>,
    frame_id: u64,
}

impl<M: SimulationModule> FrameLoop<M> {
    #[must_use]
    pub fn new(
        host: Host<M>,
        config: LoopConfig,
        control: Arc<LoopControl>,
        inputs: mpsc::Receiver<DoomKey>,
    ) -> Self {
        Self {
            host,
            config,
            control,
            inputs,
            frame_id: 0,
        }
    }

    /// Number of frames stepped so far.
    #[must_use]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[must_use]
    pub fn host(&self) -> &Host<M> {
        &self.host
    }

    /// Run until stopped, until `max_frames` is reached, or until the module
    /// traps. Returns the number of frames stepped by this call.
    ///
    /// # Errors
    ///
    /// Returns the [`HostError`] of a trapping entry point or a failed memory
    /// growth. An unreadable checkpoint is logged and skipped.
    pub async fn run<H: FrameHook>(&mut self, hook: &mut H) -> Result<u64, HostError> {
        let result = self.run_frames(hook).await;
        self.control.stop();
        self.control.finished.send_replace(true);
        match &result {
            Ok(frames) => info!(frames, frame_id = self.frame_id, "frame loop stopped"),
            Err(error) => warn!(%error, frame_id = self.frame_id, "frame loop aborted"),
        }
        result
    }

    async fn run_frames<H: FrameHook>(&mut self, hook: &mut H) -> Result<u64, HostError> {
        let interval = self.config.interval();
        let mut frames = 0u64;

        info!(
            frames_per_second = self.config.frames_per_second,
            max_frames = self.config.max_frames,
            "starting frame loop"
        );

        while self.control.is_running() {
            let start = Instant::now();

            self.deliver_inputs()?;

            self.frame_id += 1;
            let frame = self.host.step()?.map(|frame| frame.to_buffer());
            hook.on_step(StepOutput {
                frame_id: self.frame_id,
                frame,
            })
            .await;
            frames += 1;

            self.apply_requests(hook).await?;

            if self.config.max_frames > 0 && frames >= self.config.max_frames {
                info!(frames, "frame budget reached");
                break;
            }

            match pace(interval, start.elapsed()) {
                Pace::Sleep(remaining) => tokio::time::sleep(remaining).await,
                Pace::Overrun(elapsed) => warn!(
                    frame_id = self.frame_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = interval.as_millis() as u64,
                    "frame exceeded time budget"
                ),
            }
        }

        Ok(frames)
    }

    fn deliver_inputs(&mut self) -> Result<(), HostError> {
        while let Ok(key) = self.inputs.try_recv() {
            debug!(event = ?key.event, key_code = key.key_code, ts = key.ts, "delivering input");
            self.host.send_key(&key)?;
        }
        Ok(())
    }

    /// Save first, then load: a simultaneous request saves pre-load state.
    async fn apply_requests<H: FrameHook>(&mut self, hook: &mut H) -> Result<(), HostError> {
        if self.control.take_save_request() {
            match self.host.checkpoint() {
                Ok(checkpoint) => {
                    hook.on_checkpoint(checkpoint).await;
                    self.control.saves.send_modify(|count| *count += 1);
                }
                Err(error) => warn!(%error, frame_id = self.frame_id, "failed to capture checkpoint"),
            }
        }

        if let Some(checkpoint) = self.control.take_pending_load() {
            match self.host.restore(&checkpoint) {
                Ok(()) => {}
                Err(HostError::Checkpoint(error)) => warn!(
                    %error,
                    frame_id = self.frame_id,
                    "checkpoint unreadable, continuing without restored state"
                ),
                Err(error) => return Err(error),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use doom_core::KeyEvent;

    use super::*;
    use crate::clock::SimClock;
    use crate::testing::{FRAME_PAGES, FakeLoader, ModuleCall, RecordingHook};

    fn frame_loop(
        loader: &FakeLoader,
        config: LoopConfig,
        control: Arc<LoopControl>,
    ) -> (FrameLoop<crate::testing::FakeModule>, mpsc::Sender<DoomKey>) {
        let host = Host::start(loader, b"fake", Arc::new(SimClock::new())).unwrap();
        let (tx, rx) = input_queue();
        (FrameLoop::new(host, config, control, rx), tx)
    }

    fn limited(max_frames: u64) -> LoopConfig {
        LoopConfig {
            max_frames,
            ..LoopConfig::default()
        }
    }

    fn gaps(hook: &RecordingHook) -> Vec<Duration> {
        let steps = hook.steps();
        steps.windows(2).map(|w| w[1].at - w[0].at).collect()
    }

    #[test]
    fn test_interval() {
        assert_eq!(LoopConfig::default().interval(), Duration::from_millis(40));
        let config = LoopConfig {
            frames_per_second: 0,
            max_frames: 0,
        };
        assert_eq!(config.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_pace() {
        let interval = Duration::from_millis(40);
        assert_eq!(
            pace(interval, Duration::from_millis(10)),
            Pace::Sleep(Duration::from_millis(30))
        );
        assert_eq!(
            pace(interval, Duration::from_millis(40)),
            Pace::Overrun(Duration::from_millis(40))
        );
        assert_eq!(
            pace(interval, Duration::from_millis(50)),
            Pace::Overrun(Duration::from_millis(50))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_out_remaining_budget() {
        let loader = FakeLoader::with_pages(1);
        let (mut frame_loop, _tx) = frame_loop(&loader, limited(4), Arc::new(LoopControl::new()));
        let mut hook = RecordingHook::delayed(Duration::from_millis(10));

        let frames = frame_loop.run(&mut hook).await.unwrap();

        assert_eq!(frames, 4);
        assert_eq!(gaps(&hook), vec![Duration::from_millis(40); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_starts_next_frame_immediately() {
        let loader = FakeLoader::with_pages(1);
        let (mut frame_loop, _tx) = frame_loop(&loader, limited(3), Arc::new(LoopControl::new()));
        let mut hook = RecordingHook::delayed(Duration::from_millis(50));

        frame_loop.run(&mut hook).await.unwrap();

        assert_eq!(gaps(&hook), vec![Duration::from_millis(50); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_copied_out() {
        let loader = FakeLoader::with_pages(FRAME_PAGES);
        let (mut frame_loop, _tx) = frame_loop(&loader, limited(2), Arc::new(LoopControl::new()));
        let mut hook = RecordingHook::default();

        frame_loop.run(&mut hook).await.unwrap();

        let steps = hook.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].frame_id, 1);
        assert_eq!(steps[0].first_pixel, Some(1));
        assert_eq!(steps[1].first_pixel, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inputs_delivered_in_arrival_order_before_step() {
        let loader = FakeLoader::with_pages(1);
        let (mut frame_loop, tx) = frame_loop(&loader, limited(1), Arc::new(LoopControl::new()));
        tx.send(DoomKey::down(1.0, 97)).await.unwrap();
        tx.send(DoomKey::up(2.0, 97)).await.unwrap();

        frame_loop.run(&mut RecordingHook::default()).await.unwrap();

        assert_eq!(
            loader.calls(),
            vec![
                ModuleCall::Init,
                ModuleCall::Input(KeyEvent::KeyDown, 97),
                ModuleCall::Input(KeyEvent::KeyUp, 97),
                ModuleCall::Advance(1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_captures_state_before_load() {
        let loader = FakeLoader::with_pages(1);
        let control = Arc::new(LoopControl::new());
        let (mut frame_loop, _tx) = frame_loop(&loader, limited(1), control.clone());

        let mut loaded = vec![0u8; 16];
        loaded[1] = 0xAB;
        control.request_save();
        control.request_load(Checkpoint::capture(&loaded, 5_000.0).unwrap());

        let mut hook = RecordingHook::default();
        frame_loop.run(&mut hook).await.unwrap();

        let saved = hook.checkpoints();
        assert_eq!(saved.len(), 1);
        let saved_memory = saved[0].memory().unwrap();
        assert_eq!(saved_memory[0], 1);
        assert_eq!(saved_memory[1], 0);

        let live = frame_loop.host().module().memory();
        assert_eq!(live[0], 0);
        assert_eq!(live[1], 0xAB);
        assert_eq!(*control.subscribe_saves().borrow(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_checkpoint_does_not_stop_loop() {
        let loader = FakeLoader::with_pages(1);
        let control = Arc::new(LoopControl::new());
        let (mut frame_loop, _tx) = frame_loop(&loader, limited(3), control.clone());
        control.request_load(Checkpoint {
            snapshot: "not base64!".to_string(),
            timestamp: 0.0,
        });

        let frames = frame_loop.run(&mut RecordingHook::default()).await.unwrap();
        assert_eq!(frames, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_step_finishes_that_frame() {
        let control = Arc::new(LoopControl::new());
        let stopper = control.clone();
        let loader = FakeLoader::with_pages(1).on_advance(move |step| {
            if step == 3 {
                stopper.stop();
            }
        });
        let (mut frame_loop, _tx) = frame_loop(&loader, LoopConfig::default(), control.clone());
        let mut hook = RecordingHook::default();

        let frames = frame_loop.run(&mut hook).await.unwrap();

        assert_eq!(frames, 3);
        let ids: Vec<u64> = hook.steps().iter().map(|s| s.frame_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(*control.subscribe_finished().borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_before_run_steps_nothing() {
        let loader = FakeLoader::with_pages(1);
        let control = Arc::new(LoopControl::new());
        control.stop();
        let (mut frame_loop, _tx) = frame_loop(&loader, LoopConfig::default(), control);

        let frames = frame_loop.run(&mut RecordingHook::default()).await.unwrap();
        assert_eq!(frames, 0);
        assert_eq!(frame_loop.frame_id(), 0);
    }

    #[test]
    fn test_save_request_is_consumed_once() {
        let control = LoopControl::new();
        control.request_save();
        control.request_save();
        assert!(control.take_save_request());
        assert!(!control.take_save_request());
    }

    #[test]
    fn test_latest_load_request_wins() {
        let control = LoopControl::new();
        let first = Checkpoint::capture(&[1], 1.0).unwrap();
        let second = Checkpoint::capture(&[2], 2.0).unwrap();
        control.request_load(first);
        control.request_load(second.clone());
        assert_eq!(control.take_pending_load(), Some(second));
        assert_eq!(control.take_pending_load(), None);
    }
}

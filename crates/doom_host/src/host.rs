//! The simulation host.
//!
//! Owns one instantiated module and translates between the harness's
//! time/input/checkpoint model and the module's primitive ABI. All access is
//! through `&mut self`, so a step, an input delivery and a restore can never
//! overlap.

use std::sync::Arc;

use tracing::{info, warn};

use doom_core::screen::FRAME_LEN;
use doom_core::{Checkpoint, DoomKey, Frame, KeyEvent};

use crate::clock::SimClock;
use crate::error::HostError;
use crate::module::{ModuleEnv, ModuleLoader, SimulationModule, pages_to_grow};

/// A started simulation.
pub struct Host<M> {
    module: M,
    clock: Arc<SimClock>,
}

impl<M: SimulationModule> Host<M> {
    /// Instantiate `module_bytes` with `loader` and run its setup entry point
    /// exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Instantiate`] or [`HostError::Trap`]; neither is
    /// recoverable.
    pub fn start<L>(loader: &L, module_bytes: &[u8], clock: Arc<SimClock>) -> Result<Self, HostError>
    where
        L: ModuleLoader<Module = M>,
    {
        let env = ModuleEnv {
            clock: clock.clone(),
        };
        let mut module = loader.load(module_bytes, env)?;
        module.init()?;
        info!(memory_bytes = module.memory().len(), "simulation started");
        Ok(Self { module, clock })
    }

    /// Advance one frame and return a view of the frame the module drew, if
    /// any. The view borrows the host, so it cannot outlive the next step.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Trap`] if the module traps.
    pub fn step(&mut self) -> Result<Option<Frame<'_>>, HostError> {
        self.module.advance()?;
        let Some(offset) = self.module.take_drawn_frame() else {
            return Ok(None);
        };
        let frame = Frame::at(self.module.memory(), offset as usize);
        if frame.is_none() {
            warn!(
                offset,
                frame_len = FRAME_LEN,
                memory_bytes = self.module.memory().len(),
                "module drew a frame outside its memory"
            );
        }
        Ok(frame)
    }

    /// Deliver one input event to the module.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Trap`] if the module traps.
    pub fn send_key(&mut self, key: &DoomKey) -> Result<(), HostError> {
        self.module.queue_input(key.event, key.key_code)
    }

    /// # Errors
    ///
    /// Returns [`HostError::Trap`] if the module traps.
    pub fn key_down(&mut self, key_code: i32) -> Result<(), HostError> {
        self.module.queue_input(KeyEvent::KeyDown, key_code)
    }

    /// # Errors
    ///
    /// Returns [`HostError::Trap`] if the module traps.
    pub fn key_up(&mut self, key_code: i32) -> Result<(), HostError> {
        self.module.queue_input(KeyEvent::KeyUp, key_code)
    }

    /// Capture the whole memory and the simulation clock.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Checkpoint`] if encoding fails.
    pub fn checkpoint(&self) -> Result<Checkpoint, HostError> {
        let checkpoint = Checkpoint::capture(self.module.memory(), self.clock.now_ms())?;
        info!(
            memory_bytes = self.module.memory().len(),
            snapshot_len = checkpoint.snapshot.len(),
            timestamp = checkpoint.timestamp,
            "checkpoint captured"
        );
        Ok(checkpoint)
    }

    /// Overwrite memory with a checkpoint and re-baseline the clock.
    ///
    /// Memory grows in whole pages when the snapshot is larger than the
    /// current allocation; snapshot bytes are never truncated. Bytes past
    /// the end of a smaller snapshot are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Checkpoint`] if the snapshot does not decode, in
    /// which case memory is untouched, or [`HostError::Grow`].
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<(), HostError> {
        let snapshot = checkpoint.memory()?;
        let current = self.module.memory().len();
        let pages = pages_to_grow(current, snapshot.len());
        if pages > 0 {
            self.module.grow_memory(pages)?;
        }
        self.module.memory_mut()[..snapshot.len()].copy_from_slice(&snapshot);
        self.clock.rebase(checkpoint.timestamp);
        info!(
            snapshot_bytes = snapshot.len(),
            grown_pages = pages,
            timestamp = checkpoint.timestamp,
            "checkpoint restored"
        );
        Ok(())
    }

    /// The instantiated module.
    #[must_use]
    pub fn module(&self) -> &M {
        &self.module
    }

    /// The clock the module reads through its clock import.
    #[must_use]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }
}

//! In-process fake module for exercising the host without a wasm binary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::time::Instant;

use doom_core::screen::FRAME_LEN;
use doom_core::{Checkpoint, KeyEvent};

use crate::error::HostError;
use crate::frame_loop::{FrameHook, StepOutput};
use crate::module::{ModuleEnv, ModuleLoader, PAGE_SIZE, SimulationModule};

/// Enough pages for the fake's frame at offset 0 to be readable.
pub const FRAME_PAGES: usize = FRAME_LEN.div_ceil(PAGE_SIZE);

/// Every entry point invocation the fake saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleCall {
    Init,
    Input(KeyEvent, i32),
    Advance(u64),
}

type AdvanceHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Writes its step counter into byte 0 and draws a frame at offset 0 on
/// every advance.
pub struct FakeModule {
    memory: Vec<u8>,
    steps: u64,
    drawn: Option<u32>,
    calls: Arc<Mutex<Vec<ModuleCall>>>,
    on_advance: Option<AdvanceHook>,
}

impl SimulationModule for FakeModule {
    fn init(&mut self) -> Result<(), HostError> {
        self.calls.lock().unwrap().push(ModuleCall::Init);
        Ok(())
    }

    fn queue_input(&mut self, event: KeyEvent, key_code: i32) -> Result<(), HostError> {
        self.calls
            .lock()
            .unwrap()
            .push(ModuleCall::Input(event, key_code));
        Ok(())
    }

    fn advance(&mut self) -> Result<(), HostError> {
        self.steps += 1;
        self.calls.lock().unwrap().push(ModuleCall::Advance(self.steps));
        if let Some(first) = self.memory.first_mut() {
            *first = self.steps as u8;
        }
        self.drawn = Some(0);
        if let Some(hook) = &self.on_advance {
            hook(self.steps);
        }
        Ok(())
    }

    fn take_drawn_frame(&mut self) -> Option<u32> {
        self.drawn.take()
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn grow_memory(&mut self, pages: u64) -> Result<(), HostError> {
        let len = self.memory.len() + pages as usize * PAGE_SIZE;
        self.memory.resize(len, 0);
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeLoader {
    pages: usize,
    fail: bool,
    instantiations: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<ModuleCall>>>,
    on_advance: Option<AdvanceHook>,
}

impl FakeLoader {
    pub fn with_pages(pages: usize) -> Self {
        Self {
            pages,
            fail: false,
            instantiations: Arc::default(),
            calls: Arc::default(),
            on_advance: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_pages(1)
        }
    }

    /// Run `hook` with the step number inside every advance.
    pub fn on_advance(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_advance = Some(Arc::new(hook));
        self
    }

    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ModuleCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ModuleLoader for FakeLoader {
    type Module = FakeModule;

    fn load(&self, _bytes: &[u8], _env: ModuleEnv) -> Result<FakeModule, HostError> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(HostError::Instantiate(anyhow!("fake module refused to load")));
        }
        Ok(FakeModule {
            memory: vec![0; self.pages * PAGE_SIZE],
            steps: 0,
            drawn: None,
            calls: self.calls.clone(),
            on_advance: self.on_advance.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub frame_id: u64,
    pub at: Instant,
    pub first_pixel: Option<u8>,
}

/// Records every step and checkpoint, optionally taking `delay` per step.
#[derive(Clone, Default)]
pub struct RecordingHook {
    delay: Duration,
    steps: Arc<Mutex<Vec<StepRecord>>>,
    checkpoints: Arc<Mutex<Vec<Checkpoint>>>,
}

impl RecordingHook {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn steps(&self) -> Vec<StepRecord> {
        self.steps.lock().unwrap().clone()
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.lock().unwrap().clone()
    }
}

impl FrameHook for RecordingHook {
    async fn on_step(&mut self, step: StepOutput) {
        self.steps.lock().unwrap().push(StepRecord {
            frame_id: step.frame_id,
            at: Instant::now(),
            first_pixel: step.frame.as_ref().map(|frame| frame.pixels()[0]),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn on_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoints.lock().unwrap().push(checkpoint);
    }
}

//! The capability interface between the host and a simulation module.
//!
//! The real module is an opaque WebAssembly binary with a fixed numeric ABI
//! (see [`wasm`](crate::wasm)). Everything above this trait is written
//! against the capabilities only, so the host and the frame loop can be
//! driven by an in-process fake in tests.

use std::sync::Arc;

use doom_core::KeyEvent;

use crate::clock::SimClock;
use crate::error::HostError;

/// Size of one linear memory page in bytes.
pub const PAGE_SIZE: usize = 64 * 1024;

/// What a module gets to see of the host when it is instantiated.
#[derive(Debug, Clone)]
pub struct ModuleEnv {
    /// Backs the module's monotonic clock import.
    pub clock: Arc<SimClock>,
}

/// An instantiated simulation module.
pub trait SimulationModule: Send {
    /// Run the one-time setup entry point.
    fn init(&mut self) -> Result<(), HostError>;

    /// Queue one input event inside the module.
    fn queue_input(&mut self, event: KeyEvent, key_code: i32) -> Result<(), HostError>;

    /// Advance the simulation by one frame. Synchronous and not preemptible.
    fn advance(&mut self) -> Result<(), HostError>;

    /// Memory offset of the frame the module drew since the last call, if
    /// it drew one.
    fn take_drawn_frame(&mut self) -> Option<u32>;

    /// The module's whole linear memory.
    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];

    /// Grow linear memory by `pages` whole pages.
    fn grow_memory(&mut self, pages: u64) -> Result<(), HostError>;
}

/// Instantiates modules from their binary form.
pub trait ModuleLoader: Send + Sync {
    type Module: SimulationModule + 'static;

    /// Compile and link `bytes` against `env`. Does not call `init`.
    fn load(&self, bytes: &[u8], env: ModuleEnv) -> Result<Self::Module, HostError>;
}

/// Number of pages to add to a memory of `current` bytes so that it holds at
/// least `required` bytes.
#[must_use]
pub fn pages_to_grow(current: usize, required: usize) -> u64 {
    required.saturating_sub(current).div_ceil(PAGE_SIZE) as u64
}

/// Bounds-checked `(offset, length)` access into module memory. Offsets
/// arrive as raw `i32`s from the module and are never trusted.
#[must_use]
pub fn read_region(memory: &[u8], offset: i32, len: i32) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let len = usize::try_from(len).ok()?;
    memory.get(start..start.checked_add(len)?)
}

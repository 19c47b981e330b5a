//! # doom_host
//!
//! Drives the opaque WebAssembly Doom module.
//!
//! - [`module`]: the capability traits a simulation module implements.
//! - [`wasm`]: the wasmtime implementation and its import surface.
//! - [`clock`]: the re-baselinable simulation clock.
//! - [`host`]: one started module with step, input and checkpoint operations.
//! - [`frame_loop`]: the fixed-rate scheduler and its control state.
//! - [`harness`]: the idempotent start facade and the handle transports use.

pub mod clock;
pub mod error;
pub mod frame_loop;
pub mod harness;
pub mod host;
pub mod module;
pub mod wasm;

#[cfg(test)]
mod testing;

pub use clock::SimClock;
pub use error::HostError;
pub use frame_loop::{FrameHook, FrameLoop, LoopConfig, LoopControl, StepOutput};
pub use harness::{Doom, DoomHandle, RunHandle, RunOutcome};
pub use host::Host;
pub use module::{ModuleEnv, ModuleLoader, SimulationModule};
pub use wasm::{WasmLoader, WasmModule};

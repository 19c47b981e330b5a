//! The wasmtime-backed simulation module.
//!
//! ABI of the Doom build this harness drives:
//!
//! | direction | name                           | signature           |
//! |-----------|--------------------------------|---------------------|
//! | import    | `env.memory`                   | 108 initial pages   |
//! | import    | `js.js_console_log`            | `(offset, len)`     |
//! | import    | `js.js_stdout`                 | `(offset, len)`     |
//! | import    | `js.js_stderr`                 | `(offset, len)`     |
//! | import    | `js.js_milliseconds_since_start` | `() -> i32`       |
//! | import    | `js.js_draw_screen`            | `(offset)`          |
//! | export    | `main`                         | `()`                |
//! | export    | `add_browser_event`            | `(event, key_code)` |
//! | export    | `doom_loop_step`               | `()`                |

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use tracing::{debug, info, warn};
use wasmtime::{Caller, Engine, Linker, Memory, MemoryType, Module, Store, TypedFunc};

use doom_core::KeyEvent;

use crate::clock::SimClock;
use crate::error::HostError;
use crate::module::{ModuleEnv, ModuleLoader, SimulationModule, read_region};

/// Pages the host allocates before instantiation.
pub const INITIAL_PAGES: u32 = 108;

const MAIN_EXPORT: &str = "main";
const INPUT_EXPORT: &str = "add_browser_event";
const STEP_EXPORT: &str = "doom_loop_step";

/// Store data shared with the import callbacks.
struct ImportState {
    memory: Option<Memory>,
    clock: Arc<SimClock>,
    drawn_frame: Option<u32>,
    clock_pinned: bool,
}

/// The last module compiled, kept so that later instances skip compilation.
struct Compiled {
    source: Vec<u8>,
    module: Module,
}

/// Compiles and instantiates modules on a shared wasmtime engine.
///
/// Clones share the engine and the compiled module, so a chain of plays
/// compiles the binary once.
#[derive(Clone, Default)]
pub struct WasmLoader {
    engine: Engine,
    compiled: Arc<Mutex<Option<Compiled>>>,
}

impl WasmLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `bytes` ahead of the first [`load`](ModuleLoader::load).
    /// Blocks for as long as compilation takes; call it from a blocking task.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Instantiate`] if the bytes do not compile.
    pub fn compile(&self, bytes: &[u8]) -> Result<(), HostError> {
        self.module_for(bytes)
            .map(|_| ())
            .map_err(HostError::Instantiate)
    }

    fn module_for(&self, bytes: &[u8]) -> anyhow::Result<Module> {
        let mut compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = compiled.as_ref().filter(|cached| cached.source == bytes) {
            debug!(module_bytes = bytes.len(), "reusing compiled module");
            return Ok(cached.module.clone());
        }
        let module = Module::new(&self.engine, bytes).context("module bytes do not compile")?;
        info!(module_bytes = bytes.len(), "simulation module compiled");
        *compiled = Some(Compiled {
            source: bytes.to_vec(),
            module: module.clone(),
        });
        Ok(module)
    }
}

impl ModuleLoader for WasmLoader {
    type Module = WasmModule;

    fn load(&self, bytes: &[u8], env: ModuleEnv) -> Result<WasmModule, HostError> {
        self.module_for(bytes)
            .and_then(|module| WasmModule::instantiate(&self.engine, &module, env))
            .map_err(HostError::Instantiate)
    }
}

/// Simulation time as the module's 32-bit clock import sees it, or `None`
/// once it no longer fits.
fn module_millis(now_ms: f64) -> Option<i32> {
    (now_ms < f64::from(i32::MAX)).then(|| now_ms.max(0.0) as i32)
}

/// A live instance of the Doom module.
pub struct WasmModule {
    store: Store<ImportState>,
    memory: Memory,
    main: TypedFunc<(), ()>,
    add_event: TypedFunc<(i32, i32), ()>,
    step: TypedFunc<(), ()>,
}

impl WasmModule {
    fn instantiate(engine: &Engine, module: &Module, env: ModuleEnv) -> anyhow::Result<Self> {
        let mut store = Store::new(
            engine,
            ImportState {
                memory: None,
                clock: env.clock,
                drawn_frame: None,
                clock_pinned: false,
            },
        );
        let memory = Memory::new(&mut store, MemoryType::new(INITIAL_PAGES, None))?;
        store.data_mut().memory = Some(memory);

        let mut linker = Linker::new(engine);
        linker.define(&store, "env", "memory", memory)?;
        linker.func_wrap("js", "js_console_log", log_sink("js"))?;
        linker.func_wrap("js", "js_stdout", log_sink("stdout"))?;
        linker.func_wrap("js", "js_stderr", log_sink("stderr"))?;
        linker.func_wrap(
            "js",
            "js_milliseconds_since_start",
            |mut caller: Caller<'_, ImportState>| -> i32 {
                let state = caller.data_mut();
                let now_ms = state.clock.now_ms();
                module_millis(now_ms).unwrap_or_else(|| {
                    if !state.clock_pinned {
                        state.clock_pinned = true;
                        warn!(now_ms, "simulation clock is past the module's 32-bit range, pinning it");
                    }
                    i32::MAX
                })
            },
        )?;
        linker.func_wrap(
            "js",
            "js_draw_screen",
            |mut caller: Caller<'_, ImportState>, offset: i32| {
                caller.data_mut().drawn_frame = Some(offset as u32);
            },
        )?;

        let instance = linker
            .instantiate(&mut store, module)
            .context("module imports do not match the host")?;
        let main = instance
            .get_typed_func::<(), ()>(&mut store, MAIN_EXPORT)
            .with_context(|| format!("missing export `{MAIN_EXPORT}`"))?;
        let add_event = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, INPUT_EXPORT)
            .with_context(|| format!("missing export `{INPUT_EXPORT}`"))?;
        let step = instance
            .get_typed_func::<(), ()>(&mut store, STEP_EXPORT)
            .with_context(|| format!("missing export `{STEP_EXPORT}`"))?;

        info!(pages = INITIAL_PAGES, "simulation module instantiated");

        Ok(Self {
            store,
            memory,
            main,
            add_event,
            step,
        })
    }
}

/// Build a log import that re-emits module text line by line.
fn log_sink(stream: &'static str) -> impl Fn(Caller<'_, ImportState>, i32, i32) + Send + Sync + 'static {
    move |caller: Caller<'_, ImportState>, offset: i32, len: i32| {
        let Some(memory) = caller.data().memory else {
            return;
        };
        match read_region(memory.data(&caller), offset, len) {
            Some(bytes) => {
                for line in String::from_utf8_lossy(bytes).lines() {
                    info!(target: "doom::module", stream, "{line}");
                }
            }
            None => warn!(stream, offset, len, "module log text points outside memory"),
        }
    }
}

impl SimulationModule for WasmModule {
    fn init(&mut self) -> Result<(), HostError> {
        self.main
            .call(&mut self.store, ())
            .map_err(|source| HostError::Trap {
                entry: MAIN_EXPORT,
                source,
            })
    }

    fn queue_input(&mut self, event: KeyEvent, key_code: i32) -> Result<(), HostError> {
        self.add_event
            .call(&mut self.store, (event.discriminator(), key_code))
            .map_err(|source| HostError::Trap {
                entry: INPUT_EXPORT,
                source,
            })
    }

    fn advance(&mut self) -> Result<(), HostError> {
        self.step
            .call(&mut self.store, ())
            .map_err(|source| HostError::Trap {
                entry: STEP_EXPORT,
                source,
            })
    }

    fn take_drawn_frame(&mut self) -> Option<u32> {
        self.store.data_mut().drawn_frame.take()
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    fn grow_memory(&mut self, pages: u64) -> Result<(), HostError> {
        let previous = self
            .memory
            .grow(&mut self.store, pages)
            .map_err(|source| HostError::Grow { pages, source })?;
        debug!(previous_pages = previous, added = pages, "grew simulation memory");
        Ok(())
    }
}

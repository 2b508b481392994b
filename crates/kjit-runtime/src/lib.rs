//! Runtime surface for kjit: the accelerator front door and the kernel
//! cache.
//!
//! The cache is two-tiered — compiled source text, then loaded device
//! kernels — and holds only weak references, so kernels are reclaimed
//! when no user code retains them. Both maps sit behind one mutex per
//! accelerator; critical sections are map operations only, and
//! compilation always happens outside the lock (when two threads race on
//! the same miss, the second insert wins and both results are
//! equivalent). Failures are never memoized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use kjit_backend_core::{Backend, BackendError, BackendOptions, KernelSpecialization};
use kjit_frontend::bytecode::Program;
use kjit_frontend::FrontendError;
use kjit_ir::{IrContext, MethodHandle};
use kjit_opt::PassManager;

/// Compiled target text for one (method, specialization) pair.
#[derive(Debug)]
pub struct CompiledKernel {
    /// The kernel method.
    pub handle: MethodHandle,
    /// The specialization the text was generated under.
    pub specialization: KernelSpecialization,
    /// Entry symbol in `source`.
    pub symbol: String,
    /// Target source/assembly text.
    pub source: String,
}

/// A device-resident kernel.
#[derive(Debug)]
pub struct LoadedKernel {
    /// The compiled text this kernel was loaded from.
    pub compiled: Arc<CompiledKernel>,
    /// Selected group size.
    pub group_size: u32,
    /// Minimum grid size for full occupancy, as reported by the driver.
    pub min_grid_size: u32,
}

/// Errors surfaced by kernel compilation.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The program does not contain the requested kernel.
    #[error("unknown kernel '{0}'")]
    UnknownKernel(String),

    /// Bytecode could not be lifted to IR.
    #[error(transparent)]
    Frontend(#[from] FrontendError),

    /// The backend rejected the kernel.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The driver rejected the generated text. Reported to the caller;
    /// never cached, so the next call retries.
    #[error("compilation failed: {0}")]
    CompilationFailed(String),
}

/// Minimal driver contract: load compiled text, report launch geometry.
pub trait KernelLoader: Send + Sync {
    /// Loads a compiled kernel, honoring an implicit group size when one
    /// is requested. Returns `(group_size, min_grid_size)`.
    fn load(
        &self,
        kernel: &CompiledKernel,
        implicit_group_size: Option<u32>,
    ) -> Result<(u32, u32), CompileError>;
}

/// Host-side loader stub used by tests and dry runs.
#[derive(Debug, Default)]
pub struct HostLoader;

impl KernelLoader for HostLoader {
    fn load(
        &self,
        kernel: &CompiledKernel,
        implicit_group_size: Option<u32>,
    ) -> Result<(u32, u32), CompileError> {
        let group = implicit_group_size
            .or(kernel.specialization.max_group_size)
            .unwrap_or(128);
        Ok((group, 1))
    }
}

type CompiledKey = (MethodHandle, KernelSpecialization);
type LoadedKey = (CompiledKey, Option<u32>);

struct LoadedEntry {
    kernel: Weak<LoadedKernel>,
    group_size: u32,
    min_grid_size: u32,
}

/// Sweep cadence: a compacting sweep runs when a map's size reaches a
/// non-zero multiple of this threshold.
const GC_THRESHOLD: usize = 128;

struct CacheInner {
    compiled: HashMap<CompiledKey, Weak<CompiledKernel>>,
    loaded: HashMap<LoadedKey, LoadedEntry>,
}

/// The two-tier weak-reference kernel cache.
pub struct KernelCache {
    inner: Mutex<CacheInner>,
}

impl Default for KernelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                compiled: HashMap::new(),
                loaded: HashMap::new(),
            }),
        }
    }

    fn lookup_compiled(&self, key: &CompiledKey) -> Option<Arc<CompiledKernel>> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.compiled.get(key).and_then(Weak::upgrade)
    }

    fn insert_compiled(&self, key: CompiledKey, kernel: &Arc<CompiledKernel>) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.compiled.insert(key, Arc::downgrade(kernel));
        let len = inner.compiled.len();
        if len >= GC_THRESHOLD && len % GC_THRESHOLD == 0 {
            let old = std::mem::take(&mut inner.compiled);
            inner.compiled = old
                .into_iter()
                .filter(|(_, weak)| weak.strong_count() > 0)
                .collect();
        }
    }

    fn lookup_loaded(&self, key: &LoadedKey) -> Option<Arc<LoadedKernel>> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.loaded.get(key).and_then(|e| e.kernel.upgrade())
    }

    fn insert_loaded(&self, key: LoadedKey, kernel: &Arc<LoadedKernel>) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.loaded.insert(
            key,
            LoadedEntry {
                kernel: Arc::downgrade(kernel),
                group_size: kernel.group_size,
                min_grid_size: kernel.min_grid_size,
            },
        );
        let len = inner.loaded.len();
        if len >= GC_THRESHOLD && len % GC_THRESHOLD == 0 {
            let old = std::mem::take(&mut inner.loaded);
            inner.loaded = old
                .into_iter()
                .filter(|(_, e)| e.kernel.strong_count() > 0)
                .collect();
        }
    }

    /// Number of entries in the compiled map (live or stale).
    pub fn compiled_entry_count(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").compiled.len()
    }

    /// Number of compiled entries whose referent is still alive.
    pub fn compiled_live_count(&self) -> usize {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .compiled
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Number of entries in the loaded map (live or stale).
    pub fn loaded_entry_count(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").loaded.len()
    }
}

/// Whether an accelerator caches kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    /// Both cache tiers are active.
    Enabled,
    /// Every call compiles and loads from scratch.
    Disabled,
}

/// A device front door: backend + loader + kernel cache.
pub struct Accelerator {
    backend: Box<dyn Backend>,
    loader: Box<dyn KernelLoader>,
    cache: Option<KernelCache>,
    compile_count: AtomicUsize,
}

impl Accelerator {
    /// Creates an accelerator with an explicit loader and cache mode.
    pub fn new(
        backend: Box<dyn Backend>,
        loader: Box<dyn KernelLoader>,
        mode: CacheMode,
    ) -> Self {
        Self {
            backend,
            loader,
            cache: match mode {
                CacheMode::Enabled => Some(KernelCache::new()),
                CacheMode::Disabled => None,
            },
            compile_count: AtomicUsize::new(0),
        }
    }

    /// Creates a caching accelerator with the host loader stub.
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self::new(backend, Box::new(HostLoader), CacheMode::Enabled)
    }

    /// The backend in use.
    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    /// The cache, when enabled.
    pub fn cache(&self) -> Option<&KernelCache> {
        self.cache.as_ref()
    }

    /// Number of uncached compilations performed (test instrumentation).
    pub fn compile_count(&self) -> usize {
        self.compile_count.load(Ordering::Relaxed)
    }

    fn kernel_handle(program: &Program, name: &str) -> Result<MethodHandle, CompileError> {
        program
            .find_by_name(name)
            .map(|m| m.handle.clone())
            .ok_or_else(|| CompileError::UnknownKernel(name.to_string()))
    }

    /// Compiles a kernel, deduplicated per (method, specialization).
    pub fn compile_kernel(
        &self,
        program: &Program,
        name: &str,
        specialization: &KernelSpecialization,
    ) -> Result<Arc<CompiledKernel>, CompileError> {
        let handle = Self::kernel_handle(program, name)?;
        let key = (handle.clone(), specialization.clone());
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.lookup_compiled(&key)
        {
            return Ok(hit);
        }
        // Compile outside the lock; on a racing miss the last writer wins.
        let compiled = Arc::new(self.compile_uncached(program, &handle, specialization)?);
        if let Some(cache) = &self.cache {
            cache.insert_compiled(key, &compiled);
        }
        Ok(compiled)
    }

    fn compile_uncached(
        &self,
        program: &Program,
        handle: &MethodHandle,
        specialization: &KernelSpecialization,
    ) -> Result<CompiledKernel, CompileError> {
        self.compile_count.fetch_add(1, Ordering::Relaxed);
        // A fresh context per compilation keeps value ids, and therefore
        // the emitted text, deterministic.
        let mut ctx = IrContext::new();
        let kernel = kjit_frontend::compile(&mut ctx, program, handle.token)?;
        PassManager::standard(specialization).run(&mut ctx, kernel);
        let output = self.backend.compile(
            &ctx,
            kernel,
            &BackendOptions {
                specialization: specialization.clone(),
            },
        )?;
        Ok(CompiledKernel {
            handle: handle.clone(),
            specialization: specialization.clone(),
            symbol: output.symbol,
            source: output.source,
        })
    }

    /// Compiles and loads a kernel, deduplicated per (compiled key,
    /// implicit group size).
    pub fn load_kernel(
        &self,
        program: &Program,
        name: &str,
        specialization: &KernelSpecialization,
        implicit_group_size: Option<u32>,
    ) -> Result<Arc<LoadedKernel>, CompileError> {
        let handle = Self::kernel_handle(program, name)?;
        let key = (
            (handle, specialization.clone()),
            implicit_group_size,
        );
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.lookup_loaded(&key)
        {
            return Ok(hit);
        }
        let compiled = self.compile_kernel(program, name, specialization)?;
        let (group_size, min_grid_size) = self.loader.load(&compiled, implicit_group_size)?;
        let loaded = Arc::new(LoadedKernel {
            compiled,
            group_size,
            min_grid_size,
        });
        if let Some(cache) = &self.cache {
            cache.insert_loaded(key, &loaded);
        }
        Ok(loaded)
    }
}

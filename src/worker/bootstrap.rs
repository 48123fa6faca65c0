//! Application/runtime bootstrap boundary
//!
//! Constructing a fresh execution environment is an external concern; the
//! engine only needs one operation from it, exposed by the
//! [`RuntimeBootstrap`] trait. The in-tree [`LocalBootstrap`] stands up a
//! blank in-memory runtime and optionally warms a filesystem-backed runtime
//! cache — the shared-cache access is where sibling workers can race, which
//! is exactly the transient failure class the entry point retries.

use std::fs;
use std::path::{Path, PathBuf};

use crate::context::registry::Binding;
use crate::error::BootstrapError;
use crate::worker::runtime::WorkerRuntime;

const CACHE_MANIFEST: &str = "runtime-manifest.json";

/// Constructs a fresh runtime environment inside a worker. Callable
/// repeatedly and idempotently.
pub trait RuntimeBootstrap: Send + Sync {
    fn build_runtime(&self) -> Result<WorkerRuntime, BootstrapError>;
}

/// Default bootstrap: blank in-memory runtime, optional default bindings,
/// optional shared runtime-cache warm-up.
#[derive(Default)]
pub struct LocalBootstrap {
    cache_dir: Option<PathBuf>,
    defaults: Vec<Binding>,
}

impl LocalBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warm a shared on-disk runtime cache during construction. Concurrent
    /// warm-ups from sibling workers may collide; the resulting I/O errors
    /// are classified transient and surface to the entry point's retry
    /// loop.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Install a binding into every runtime this bootstrap constructs,
    /// standing in for the host environment's own defaults.
    pub fn with_default_binding(mut self, binding: Binding) -> Self {
        self.defaults.push(binding);
        self
    }

    fn warm_cache(dir: &Path) -> Result<(), BootstrapError> {
        fs::create_dir_all(dir)
            .map_err(|err| BootstrapError::from_io("creating runtime cache dir", err))?;
        let manifest = dir.join(CACHE_MANIFEST);
        match fs::read(&manifest) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fs::write(&manifest, b"{}")
                    .map_err(|err| BootstrapError::from_io("writing runtime cache manifest", err))
            }
            Err(err) => Err(BootstrapError::from_io("reading runtime cache manifest", err)),
        }
    }
}

impl RuntimeBootstrap for LocalBootstrap {
    fn build_runtime(&self) -> Result<WorkerRuntime, BootstrapError> {
        if let Some(dir) = &self.cache_dir {
            Self::warm_cache(dir)?;
        }

        let runtime = WorkerRuntime::fresh();
        for binding in &self.defaults {
            if let Err(err) = runtime.bindings.install(binding.clone()) {
                return Err(BootstrapError::fatal(format!(
                    "default binding `{}` rejected: {err}",
                    binding.name
                )));
            }
        }
        Ok(runtime)
    }
}

//! The stable compile-and-launch interface to accelerator code-generation
//! backends.
//!
//! No backend ships in-tree; the executor falls back to the CPU engine when
//! none is registered or when the kernel carries capabilities an accelerator
//! cannot provide (`must_run_on_cpu`).
use std::fmt::Debug;
use std::sync::Arc;

use crate::engine::LaunchArgs;
use crate::ir::Module;
use crate::Result;

/// A finalized accelerator kernel, launchable on one device.
pub trait AcceleratorKernel: Send + Sync {
    fn launch(&self, device_id: i32, args: &mut LaunchArgs<'_>) -> i32;
}

/// A device-specific code-generation backend.
pub trait AcceleratorBackend: Send + Sync + Debug {
    /// Number of devices this backend drives.
    fn device_count(&self) -> usize;

    /// Compile the module for the backend's devices.
    fn compile(
        &self,
        module: &Module,
        block_size: usize,
        grid_size: usize,
    ) -> Result<Arc<dyn AcceleratorKernel>>;
}

//! Device runtime abstraction.
//!
//! The benchmark driver only ever talks to a device through [`DeviceRuntime`]: memory
//! allocation and transfers, runtime compilation of kernel sources, kernel launches and
//! device-side timing. Every resource handed out by a runtime (buffers, compiled modules, timers)
//! releases itself when dropped, so that no error path can leak device memory.
//!
//! # Backends
//! - [`cuda`] (feature `cuda`): [`cust`][1] for the driver API and [`cudarc`][2]'s NVRTC bindings
//!   for runtime compilation;
//! - [`opencl`] (feature `opencl`): [`ocl`][3], an idiomatic Rust implementation of OpenCL
//!   bindings.
//!
//! [1]: https://crates.io/crates/cust
//! [2]: https://crates.io/crates/cudarc
//! [3]: https://crates.io/crates/ocl

#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "opencl")]
pub mod opencl;

use crate::{kernels::device::KernelSource, launch::LaunchGeometry};

use std::fmt;

use thiserror::Error;

/// Failure of a device runtime call.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{op} failed: {status}")]
    Runtime { op: &'static str, status: String },

    #[error("{op}: buffer holds {buffer} bytes but host data holds {host} bytes")]
    SizeMismatch {
        op: &'static str,
        buffer: usize,
        host: usize,
    },

    #[error("no usable device: {0}")]
    Unavailable(String),
}

/// Failure to turn a kernel source into a launchable function.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to compile kernel `{kernel}` for {arch}:\n{log}")]
    Diagnostics {
        kernel: String,
        arch: String,
        log: String,
    },

    #[error("entry point `{entry_point}` not found in compiled kernel `{kernel}`")]
    MissingEntryPoint { kernel: String, entry_point: String },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Converts a backend result into a [`DeviceError::Runtime`] naming the failing operation.
pub trait CheckStatus<T> {
    fn check(self, op: &'static str) -> Result<T, DeviceError>;
}

impl<T, E: fmt::Debug> CheckStatus<T> for Result<T, E> {
    fn check(self, op: &'static str) -> Result<T, DeviceError> {
        self.map_err(|e| DeviceError::Runtime {
            op,
            status: format!("{e:?}"),
        })
    }
}

/// Device-resident memory region. Freed on drop.
pub trait DeviceMemory {
    /// Size of the region in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Brackets a single kernel launch with device-timeline markers.
pub trait ExecutionTimer {
    /// Backend record of the enqueued launch, filled in by the launch when the backend times the
    /// command itself rather than surrounding markers.
    type Mark;

    /// Runs `launch` between a start and a stop marker, blocks until the stop marker is reached,
    /// and returns the elapsed time in milliseconds.
    ///
    /// `launch` must only enqueue the kernel: everything it does is part of the measurement. No
    /// other device work may be in flight on the runtime while timing.
    fn time<F>(&mut self, launch: F) -> Result<f32, DeviceError>
    where
        F: FnOnce(&mut Self::Mark) -> Result<(), DeviceError>;
}

/// Arguments of the GEMM kernel entry point:
/// `matmul_kernel(int M, int N, int K, A*, B*, float* C, float alpha, float beta)`.
pub struct GemmArgs<'a, B> {
    pub m: i32,
    pub n: i32,
    pub k: i32,
    pub a: &'a B,
    pub b: &'a B,
    pub c: &'a mut B,
    pub alpha: f32,
    pub beta: f32,
}

/// Handle on an initialized device runtime (context, stream or queue).
///
/// The handle is created once by the top-level process and lent to the benchmark driver.
pub trait DeviceRuntime {
    type Buffer: DeviceMemory;
    type Module;
    type Timer: ExecutionTimer;

    /// Human-readable name of the device.
    fn name(&self) -> String;

    /// Architecture identifier handed to the compiler as target.
    fn architecture(&self) -> Result<String, DeviceError>;

    fn allocate(&self, nb_bytes: usize) -> Result<Self::Buffer, DeviceError>;

    /// Copies `src` into `dst`. Both must have the same size in bytes.
    fn copy_to_device(&self, dst: &mut Self::Buffer, src: &[u8]) -> Result<(), DeviceError>;

    /// Copies `src` into `dst`. Both must have the same size in bytes.
    fn copy_to_host(&self, src: &Self::Buffer, dst: &mut [u8]) -> Result<(), DeviceError>;

    /// Compiles `source` for `arch` and resolves its entry point.
    fn compile(
        &self,
        source: &KernelSource,
        arch: &str,
        flags: &[String],
    ) -> Result<Self::Module, CompileError>;

    fn timer(&self) -> Result<Self::Timer, DeviceError>;

    /// Resolves `module`'s entry point and binds `args`, then enqueues one launch timed by
    /// `timer` and returns its duration in milliseconds.
    fn launch(
        &self,
        module: &Self::Module,
        geometry: &LaunchGeometry,
        args: GemmArgs<'_, Self::Buffer>,
        timer: &mut Self::Timer,
    ) -> Result<f32, DeviceError>;
}

/// Checks that a transfer moves exactly the size of the buffer.
pub fn check_transfer(op: &'static str, buffer: usize, host: usize) -> Result<(), DeviceError> {
    if buffer != host {
        return Err(DeviceError::SizeMismatch { op, buffer, host });
    }
    Ok(())
}

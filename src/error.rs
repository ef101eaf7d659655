//! Crate-level error type.
//!
//! Errors fall into four families: precondition failures (detected before any device work is
//! started), compilation failures, device runtime failures and correctness mismatches. None of
//! them is retried; they are propagated up to the top-level invocation which reports them once.

use crate::{
    check::CheckReport,
    device::{CompileError, DeviceError},
    kernels::Backend,
};

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kernel name must be provided")]
    EmptyKernelName,

    #[error("invalid kernel name `{name}`: path separators and `..` are not allowed")]
    InvalidKernelName { name: String },

    #[error("backend `{backend}` does not run device kernels")]
    NotADeviceBackend { backend: Backend },

    #[error("kernel file does not exist: {}", path.display())]
    MissingKernel { path: PathBuf },

    #[error("no tiling strategy is known for kernel `{name}` (pass `--tiling` to pick one)")]
    UnknownKernel { name: String },

    #[error("invalid problem dimensions M {m} x K {k} x N {n}: each must be in 1..=2147483647")]
    InvalidDimensions { m: usize, n: usize, k: usize },

    #[error("invalid block size {block_size}: a block holds at most {max_threads} threads")]
    InvalidBlockSize { block_size: u32, max_threads: u32 },

    #[error("launch grid {grid} exceeds the addressable range")]
    GridOverflow { grid: String },

    #[error("at least one timed iteration is required")]
    NoIterations,

    #[error("size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("backend `{backend}` was not built (enable the `{feature}` feature)")]
    BackendNotBuilt {
        backend: &'static str,
        feature: &'static str,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("result mismatch: {0}")]
    Mismatch(Box<CheckReport>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize results: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` for errors detected before any device resource was acquired.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::EmptyKernelName
                | Self::InvalidKernelName { .. }
                | Self::NotADeviceBackend { .. }
                | Self::MissingKernel { .. }
                | Self::UnknownKernel { .. }
                | Self::InvalidDimensions { .. }
                | Self::InvalidBlockSize { .. }
                | Self::GridOverflow { .. }
                | Self::NoIterations
                | Self::SizeMismatch { .. }
                | Self::BackendNotBuilt { .. }
        )
    }
}

//! Kernel implementations and kernel sources.
//!
//! Host kernels are implemented directly in Rust. Device kernels are written in the syntax of the
//! target framework (NVIDIA CUDA C++ or OpenCL C) and read as raw text from the kernel directory
//! at runtime, then handed to the backend's compiler.

use serde::Serialize;

use std::fmt;

/// Execution backend of a benchmarked kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cuda,
    OpenCl,
    Host,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::OpenCl => write!(f, "opencl"),
            Self::Host => write!(f, "host"),
        }
    }
}

pub mod device {
    //! Device kernel sources.

    use super::Backend;
    use crate::{
        consts::KERNEL_ENTRY_POINT,
        error::{Error, Result},
    };

    use std::{
        fs,
        path::{Path, PathBuf},
    };

    /// Represents a device kernel loaded from the kernel store.
    ///
    /// The source is kept as raw text: it is opaque to the harness and only ever handed over to
    /// the backend compiler along with the name of the function to resolve.
    #[derive(Clone, Debug)]
    pub struct KernelSource {
        name: String,
        entry_point: String,
        path: PathBuf,
        text: String,
    }

    impl KernelSource {
        /// Creates a `KernelSource` from a kernel name, the name of the function to resolve once
        /// compiled and the source code itself.
        pub fn new(name: &str, entry_point: &str, text: impl Into<String>) -> Self {
            Self {
                name: name.to_owned(),
                entry_point: entry_point.to_owned(),
                path: PathBuf::new(),
                text: text.into(),
            }
        }

        /// Returns the name the kernel is registered under.
        pub fn name(&self) -> &str {
            &self.name
        }

        /// Returns the function name of the kernel in the source code.
        pub fn entry_point(&self) -> &str {
            &self.entry_point
        }

        /// Returns the path the source was read from (empty for in-memory sources).
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Returns the source code of the kernel.
        pub fn text(&self) -> &str {
            &self.text
        }
    }

    /// Directory of kernel sources, laid out as `<root>/<backend>/<kernel>.<ext>`.
    #[derive(Clone, Debug)]
    pub struct KernelStore {
        root: PathBuf,
    }

    impl KernelStore {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self { root: root.into() }
        }

        /// Returns the path where the source of `kernel` is expected for `backend`.
        pub fn path(&self, backend: Backend, kernel: &str) -> Result<PathBuf> {
            let ext = match backend {
                Backend::Cuda => "cu",
                Backend::OpenCl => "cl",
                Backend::Host => return Err(Error::NotADeviceBackend { backend }),
            };
            Ok(self
                .root
                .join(backend.to_string())
                .join(format!("{kernel}.{ext}")))
        }

        /// Reads the source of `kernel` for `backend`.
        ///
        /// An invalid kernel name and a missing file are both reported before anything is handed
        /// to a compiler.
        pub fn load(&self, backend: Backend, kernel: &str) -> Result<KernelSource> {
            validate_name(kernel)?;

            let path = self.path(backend, kernel)?;
            if !path.is_file() {
                return Err(Error::MissingKernel { path });
            }

            let text = fs::read_to_string(&path)?;
            Ok(KernelSource {
                name: kernel.to_owned(),
                entry_point: KERNEL_ENTRY_POINT.to_owned(),
                path,
                text,
            })
        }
    }

    /// Checks that `kernel` names a file directly inside a backend directory of the store.
    ///
    /// The name also ends up in result file names, so it must not contain path separators.
    pub fn validate_name(kernel: &str) -> Result<()> {
        if kernel.is_empty() {
            return Err(Error::EmptyKernelName);
        }
        if kernel.contains(['/', '\\']) || kernel.contains("..") {
            return Err(Error::InvalidKernelName {
                name: kernel.to_owned(),
            });
        }
        Ok(())
    }

}

pub mod host {
    //! Host kernel implementations.
    //!
    //! All kernels compute `C = alpha * A * B + beta * C` on row-major matrices, `A` being
    //! `m x k`, `B` being `k x n` and `C` being `m x n`. The parallel implementation relies on the
    //! [`rayon`][1] crate.
    //!
    //! [1]: https://crates.io/crates/rayon

    use clap::ValueEnum;
    use rayon::prelude::*;
    use serde::Serialize;

    use std::{
        fmt,
        ops::{AddAssign, MulAssign},
    };

    /// Floating-point element type accepted by the host kernels.
    pub trait HostFloat: num::Float + Default + AddAssign + MulAssign + Send + Sync {}

    impl HostFloat for f32 {}
    impl HostFloat for f64 {}

    /// Host-specific possible kernel implementations.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum HostKernelVariant {
        SeqNaive,
        SeqIter,
        ParIter,
    }

    impl HostKernelVariant {
        /// Returns the kernel function implementing this variant.
        #[allow(clippy::type_complexity)]
        pub fn kernel<T: HostFloat>(self) -> fn(usize, usize, usize, T, &[T], &[T], T, &mut [T]) {
            match self {
                Self::SeqNaive => gemm::<T>,
                Self::SeqIter => iter_gemm::<T>,
                Self::ParIter => par_iter_gemm::<T>,
            }
        }
    }

    impl fmt::Display for HostKernelVariant {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::SeqNaive => write!(f, "seq_naive"),
                Self::SeqIter => write!(f, "seq_iter"),
                Self::ParIter => write!(f, "par_iter"),
            }
        }
    }

    // Naive implementation of the GEMM kernel (unidiomatic Rust).
    #[allow(clippy::too_many_arguments, non_snake_case)]
    pub fn gemm<T: HostFloat>(
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        A: &[T],
        B: &[T],
        beta: T,
        C: &mut [T],
    ) {
        for i in 0..m {
            for j in 0..n {
                let mut acc = T::default();
                for l in 0..k {
                    acc += A[i * k + l] * B[l * n + j];
                }
                C[i * n + j] = alpha * acc + beta * C[i * n + j];
            }
        }
    }

    // Computes one row of `C` as a linear combination of the rows of `B`.
    #[allow(non_snake_case)]
    fn row_gemm<T: HostFloat>(n: usize, alpha: T, a_row: &[T], B: &[T], beta: T, c_row: &mut [T]) {
        c_row.iter_mut().for_each(|c_ij| *c_ij *= beta);
        a_row
            .iter()
            .zip(B.chunks_exact(n))
            .for_each(|(a_il, b_row)| {
                let scale = alpha * *a_il;
                c_row
                    .iter_mut()
                    .zip(b_row)
                    .for_each(|(c_ij, b_lj)| *c_ij += scale * *b_lj);
            });
    }

    // Idiomatic Rust implementation of the GEMM kernel (using iterators).
    #[allow(clippy::too_many_arguments, non_snake_case)]
    pub fn iter_gemm<T: HostFloat>(
        _m: usize,
        n: usize,
        k: usize,
        alpha: T,
        A: &[T],
        B: &[T],
        beta: T,
        C: &mut [T],
    ) {
        C.chunks_exact_mut(n)
            .zip(A.chunks_exact(k))
            .for_each(|(c_row, a_row)| row_gemm(n, alpha, a_row, B, beta, c_row));
    }

    // Parallel implementation of the GEMM kernel (using `rayon`'s parallel iterators).
    #[allow(clippy::too_many_arguments, non_snake_case)]
    pub fn par_iter_gemm<T: HostFloat>(
        _m: usize,
        n: usize,
        k: usize,
        alpha: T,
        A: &[T],
        B: &[T],
        beta: T,
        C: &mut [T],
    ) {
        C.par_chunks_exact_mut(n)
            .zip(A.par_chunks_exact(k))
            .for_each(|(c_row, a_row)| row_gemm(n, alpha, a_row, B, beta, c_row));
    }

}

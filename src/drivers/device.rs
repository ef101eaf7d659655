//! Device kernel driver.
//!
//! [`BenchmarkDriver`] runs one end-to-end test of a device kernel on a [`DeviceRuntime`]:
//!
//! ```text
//! Unconfigured -> Compiled -> Allocated -> Executed -> Validated -> Released
//!       \______________\___________\___________\____________\______> Failed
//! ```
//!
//! Every device resource (module, buffers, timer) lives in the scope of a single test and is
//! released when that scope is left, whether the test succeeded or not. The driver never retries.

use crate::{
    check::{self, MismatchPolicy, Tolerance},
    device::{DeviceRuntime, GemmArgs},
    error::{Error, Result},
    kernels::{device::KernelStore, Backend},
    launch::{self, TilingStrategy},
    problem::{f32_from_bytes, DataType, Operands, Problem},
};

use super::TestOutcome;

use tracing::{debug, info};

use std::fmt;

/// Lifecycle stage of a device test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Unconfigured,
    Compiled,
    Allocated,
    Executed,
    Validated,
    Released,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Compiled => write!(f, "compiled"),
            Self::Allocated => write!(f, "allocated"),
            Self::Executed => write!(f, "executed"),
            Self::Validated => write!(f, "validated"),
            Self::Released => write!(f, "released"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Device kernel to benchmark.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceKernelSpec {
    pub name: String,
    pub strategy: TilingStrategy,
}

/// Drives single-kernel tests on a borrowed device runtime.
pub struct BenchmarkDriver<'rt, D: DeviceRuntime> {
    runtime: &'rt D,
    backend: Backend,
    store: KernelStore,
    flags: Vec<String>,
    policy: MismatchPolicy,
    tolerance: Option<Tolerance>,
    stage: Stage,
}

impl<'rt, D: DeviceRuntime> BenchmarkDriver<'rt, D> {
    pub fn new(runtime: &'rt D, backend: Backend, store: KernelStore) -> Self {
        Self {
            runtime,
            backend,
            store,
            flags: Vec::new(),
            policy: MismatchPolicy::default(),
            tolerance: None,
            stage: Stage::Unconfigured,
        }
    }

    /// Extra flags handed to the kernel compiler.
    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the tolerance derived from the problem's datatype.
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Stage reached by the last test.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Runs one test of `kernel` on `problem`.
    ///
    /// `expected` is the reference result, computed from `operands` before calling this
    /// function.
    pub fn run(
        &mut self,
        kernel: &DeviceKernelSpec,
        problem: &Problem,
        operands: &Operands,
        expected: &[f32],
    ) -> Result<TestOutcome> {
        self.stage = Stage::Unconfigured;
        let outcome = self.run_stages(kernel, problem, operands, expected);
        // All device resources of the test have been dropped at this point.
        match outcome {
            Ok(_) => self.enter(Stage::Released),
            Err(ref e) => {
                debug!("test failed in stage `{}`: {e}", self.stage);
                self.enter(Stage::Failed);
            }
        }
        outcome
    }

    fn enter(&mut self, stage: Stage) {
        debug!("{} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn run_stages(
        &mut self,
        kernel: &DeviceKernelSpec,
        problem: &Problem,
        operands: &Operands,
        expected: &[f32],
    ) -> Result<TestOutcome> {
        // Preconditions, checked before any device work
        let source = self.store.load(self.backend, &kernel.name)?;
        if expected.len() != problem.m * problem.n {
            return Err(Error::SizeMismatch {
                what: "reference",
                expected: problem.m * problem.n,
                actual: expected.len(),
            });
        }
        let dtype = problem.dtype;
        let h_a = host_bytes("A", dtype.encode(operands.a.as_slice()), problem.nb_bytes_a())?;
        let h_b = host_bytes("B", dtype.encode(operands.b.as_slice()), problem.nb_bytes_b())?;
        let h_c = host_bytes(
            "C",
            DataType::Fp32.encode(operands.c.as_slice()),
            problem.nb_bytes_c(),
        )?;
        let (m, n, k) = kernel_dims(problem)?;
        let geometry = launch::configure(kernel.strategy, problem.m, problem.n, problem.k)?;

        // Unconfigured -> Compiled
        let arch = self.runtime.architecture()?;
        info!("Compiling kernel `{}` for {arch}", source.name());
        let module = self.runtime.compile(&source, &arch, &self.flags)?;
        self.enter(Stage::Compiled);

        // Compiled -> Allocated
        let d_a = self.upload(&h_a)?;
        let d_b = self.upload(&h_b)?;
        let mut d_c = self.upload(&h_c)?;
        self.enter(Stage::Allocated);

        // Allocated -> Executed
        debug!("launching `{}` with {geometry} ({})", source.name(), kernel.strategy);
        let runtime = self.runtime;
        let mut timer = runtime.timer()?;
        let args = GemmArgs {
            m,
            n,
            k,
            a: &d_a,
            b: &d_b,
            c: &mut d_c,
            alpha: problem.alpha,
            beta: problem.beta,
        };
        let elapsed_ms = runtime.launch(&module, &geometry, args, &mut timer)?;
        self.enter(Stage::Executed);

        // Executed -> Validated
        let mut h_out = vec![0; problem.nb_bytes_c()];
        runtime.copy_to_host(&d_c, &mut h_out)?;
        let actual = f32_from_bytes(&h_out);
        let tolerance = self
            .tolerance
            .unwrap_or_else(|| Tolerance::for_dtype(problem.dtype));
        let report = check::compare(&actual, expected, problem.n, tolerance)?;
        let report = self.policy.apply(report)?;
        self.enter(Stage::Validated);

        Ok(TestOutcome { elapsed_ms, report })
    }

    /// Allocates a buffer holding a copy of `host`. The buffer is freed if the copy fails.
    fn upload(&self, host: &[u8]) -> Result<D::Buffer> {
        let mut buffer = self.runtime.allocate(host.len())?;
        self.runtime.copy_to_device(&mut buffer, host)?;
        Ok(buffer)
    }
}

fn host_bytes(what: &'static str, bytes: Vec<u8>, expected: usize) -> Result<Vec<u8>> {
    if bytes.len() != expected {
        return Err(Error::SizeMismatch {
            what,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

// Kernels take their dimensions as 32-bit signed integers.
fn kernel_dims(problem: &Problem) -> Result<(i32, i32, i32)> {
    let invalid = || Error::InvalidDimensions {
        m: problem.m,
        n: problem.n,
        k: problem.k,
    };
    Ok((
        i32::try_from(problem.m).map_err(|_| invalid())?,
        i32::try_from(problem.n).map_err(|_| invalid())?,
        i32::try_from(problem.k).map_err(|_| invalid())?,
    ))
}

//! Kernel drivers.
//!
//! This module provides the API for appropriately initializing and profiling the kernels, as well
//! as post-processing the results. It acts as a layer abstracting over the kernel's target: either
//! the host (CPU) or a device (GPU) driven through CUDA or OpenCL.
//!
//! # High-level approach for kernel profiling
//! ## 1. Data initialization
//! Random `A`, `B` and `C` operands are generated once per run, rounded to the requested
//! datatype, and the reference result `alpha * A * B + beta * C` is computed on the host before
//! any device buffer is populated.
//!
//! ## 2. Performance evaluation
//! The kernel is tested `num_warmup` times without recording, then `num_iterations` times while
//! recording the execution time. Every test is a complete, independent end-to-end run: for device
//! kernels this means compiling the source, allocating and filling the buffers, launching, copying
//! the result back and releasing everything (see [`device::BenchmarkDriver`]). Every test is also
//! checked against the reference.
//!
//! ## 3. Post-processing
//! The recorded execution times are aggregated into [`TimingStats`] and a throughput in TFLOP/s,
//! gathered in a [`ResultRecord`].

pub mod device;
pub mod host;

use crate::{
    check::CheckReport,
    config::{DeviceTarget, EvalConfig, Target},
    device::DeviceRuntime,
    error::{Error, Result},
    kernels::{device::KernelStore, Backend},
    perf_report::{ResultRecord, TimingStats},
    problem::{Operands, Problem},
    reference,
};

use self::device::BenchmarkDriver;

use tracing::{debug, info};

/// Outcome of one successful test.
#[derive(Clone, Debug, PartialEq)]
pub struct TestOutcome {
    /// Kernel execution time in milliseconds.
    pub elapsed_ms: f32,
    /// Comparison against the reference (failed only under the `record` mismatch policy).
    pub report: CheckReport,
}

/// Driver function responsible for initializing the data for the GEMM kernel and forwarding it to
/// the dedicated target driver. It gathers the timings of every iteration and generates the
/// result record.
pub fn gemm(config: &EvalConfig) -> Result<ResultRecord> {
    if config.num_iterations == 0 {
        return Err(Error::NoIterations);
    }
    if let Target::Device(target) = &config.target {
        if target.backend == Backend::Host {
            return Err(Error::NotADeviceBackend {
                backend: target.backend,
            });
        }
    }
    let problem = &config.problem;
    info!("Running {} kernel", config.backend());
    info!("Testing kernel with size: {problem}");
    info!(
        "Using kernel backend: {} kernel name: {}",
        config.backend(),
        config.kernel_name()
    );

    let operands = Operands::random(problem, config.seed);
    let expected = reference::gemm(problem, &operands);

    let samples = match &config.target {
        Target::Host { variant } => run_iterations(config, || {
            host::gemm(
                problem,
                &operands,
                &expected,
                *variant,
                config.tolerance,
                config.policy,
            )
        })?,
        Target::Device(target) => device_samples(config, target, &operands, &expected)?,
    };

    let stats = TimingStats::new(&samples)?;
    let record = ResultRecord::new(config, stats);
    info!(
        "Average kernel execution time: {:.4} ms over {} runs",
        stats.mean, config.num_iterations
    );
    info!(
        "Performance: {:.2} TFLOP/s, size: ({} x {}) * ({} x {})",
        record.performance.tflops, problem.m, problem.k, problem.k, problem.n
    );

    Ok(record)
}

/// Performs the warm-up runs, then the timed runs, and returns the timings of the latter.
fn run_iterations<F>(config: &EvalConfig, mut test: F) -> Result<Vec<f64>>
where
    F: FnMut() -> Result<TestOutcome>,
{
    for i in 0..config.num_warmup {
        let outcome = test()?;
        debug!("warm-up {i}: {:.4} ms", outcome.elapsed_ms);
    }

    let mut samples = Vec::with_capacity(config.num_iterations.into());
    for i in 0..config.num_iterations {
        let outcome = test()?;
        debug!("iteration {i}: {:.4} ms, {}", outcome.elapsed_ms, outcome.report);
        samples.push(outcome.elapsed_ms.into());
    }
    Ok(samples)
}

/// Initializes the runtime of the target's backend and runs all iterations on it.
#[cfg_attr(not(all(feature = "cuda", feature = "opencl")), allow(unused_variables))]
fn device_samples(
    config: &EvalConfig,
    target: &DeviceTarget,
    operands: &Operands,
    expected: &[f32],
) -> Result<Vec<f64>> {
    match target.backend {
        #[cfg(feature = "cuda")]
        Backend::Cuda => {
            let runtime = crate::device::cuda::CudaRuntime::init(target.device)?;
            run_on_device(&runtime, config, target, &config.problem, operands, expected)
        }
        #[cfg(feature = "opencl")]
        Backend::OpenCl => {
            let runtime = crate::device::opencl::OclRuntime::init(target.device as usize)?;
            run_on_device(&runtime, config, target, &config.problem, operands, expected)
        }
        #[cfg(not(feature = "cuda"))]
        Backend::Cuda => Err(Error::BackendNotBuilt {
            backend: "cuda",
            feature: "cuda",
        }),
        #[cfg(not(feature = "opencl"))]
        Backend::OpenCl => Err(Error::BackendNotBuilt {
            backend: "opencl",
            feature: "opencl",
        }),
        Backend::Host => Err(Error::NotADeviceBackend {
            backend: Backend::Host,
        }),
    }
}

/// Runs all iterations of `target`'s kernel on `runtime`.
pub fn run_on_device<D: DeviceRuntime>(
    runtime: &D,
    config: &EvalConfig,
    target: &DeviceTarget,
    problem: &Problem,
    operands: &Operands,
    expected: &[f32],
) -> Result<Vec<f64>> {
    info!("Using device: {}", runtime.name());
    let mut driver = BenchmarkDriver::new(
        runtime,
        target.backend,
        KernelStore::new(&target.kernel_dir),
    )
    .with_flags(target.flags.clone())
    .with_policy(config.policy)
    .with_tolerance(config.tolerance);

    run_iterations(config, || driver.run(&target.kernel, problem, operands, expected))
}

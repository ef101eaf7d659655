//! Evaluation configuration.
//!
//! [`EvalConfig`] is the validated form of the command-line arguments: presets are applied, the
//! problem is checked and the tiling strategy of device kernels is resolved, so that bad input is
//! reported before any device is touched.

use crate::{
    check::{MismatchPolicy, Tolerance},
    cli::{BackendCmd, CliArgs, DeviceKernelArgs},
    consts::{CORRECTNESS_DIM, DEFAULT_DIM},
    drivers::device::DeviceKernelSpec,
    error::Result,
    kernels::{device as kernel_store, host::HostKernelVariant, Backend},
    launch::TilingStrategy,
    problem::Problem,
};

use std::path::PathBuf;

/// Where the benchmarked kernel runs.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Host { variant: HostKernelVariant },
    Device(DeviceTarget),
}

/// Device kernel and the device to run it on.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceTarget {
    pub backend: Backend,
    pub kernel: DeviceKernelSpec,
    pub kernel_dir: PathBuf,
    pub device: u32,
    pub flags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvalConfig {
    pub problem: Problem,
    pub target: Target,
    pub num_warmup: u16,
    pub num_iterations: u16,
    pub seed: Option<u64>,
    pub results_dir: PathBuf,
    pub policy: MismatchPolicy,
    pub tolerance: Tolerance,
    pub debug: bool,
}

impl EvalConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let (default_m, default_k, default_n) = match (args.shape, args.correctness) {
            (Some(shape), _) => shape.dims(),
            (None, true) => (CORRECTNESS_DIM, CORRECTNESS_DIM, CORRECTNESS_DIM),
            (None, false) => (DEFAULT_DIM, DEFAULT_DIM, DEFAULT_DIM),
        };
        let problem = Problem::new(
            args.m.unwrap_or(default_m),
            args.n.unwrap_or(default_n),
            args.k.unwrap_or(default_k),
            args.alpha,
            args.beta,
            args.dtype,
        )?;

        let target = match &args.backend {
            BackendCmd::Cuda(kernel) => Target::Device(device_target(Backend::Cuda, kernel)?),
            BackendCmd::Opencl(kernel) => Target::Device(device_target(Backend::OpenCl, kernel)?),
            BackendCmd::Host { variant } => Target::Host { variant: *variant },
        };

        let default_tolerance = Tolerance::for_dtype(problem.dtype);
        let tolerance = Tolerance::new(
            args.atol.unwrap_or(default_tolerance.abs),
            args.rtol.unwrap_or(default_tolerance.rel),
        );

        let (num_warmup, num_iterations) = match args.correctness {
            true => (0, 1),
            false => (args.num_warmup, args.num_iterations),
        };

        Ok(Self {
            problem,
            target,
            num_warmup,
            num_iterations,
            seed: args.seed,
            results_dir: args.results_dir.clone(),
            policy: args.on_mismatch,
            tolerance,
            debug: args.debug || args.correctness,
        })
    }

    pub fn backend(&self) -> Backend {
        match &self.target {
            Target::Host { .. } => Backend::Host,
            Target::Device(target) => target.backend,
        }
    }

    /// Name of the benchmarked kernel (the host variant for the host backend).
    pub fn kernel_name(&self) -> String {
        match &self.target {
            Target::Host { variant } => variant.to_string(),
            Target::Device(target) => target.kernel.name.clone(),
        }
    }
}

fn device_target(backend: Backend, args: &DeviceKernelArgs) -> Result<DeviceTarget> {
    kernel_store::validate_name(&args.kernel)?;
    let strategy = TilingStrategy::resolve(&args.kernel, args.tiling, args.block_size)?;

    Ok(DeviceTarget {
        backend,
        kernel: DeviceKernelSpec {
            name: args.kernel.clone(),
            strategy,
        },
        kernel_dir: args.kernel_dir.clone(),
        device: args.device,
        flags: args.flags.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Error, problem::DataType};

    use clap::Parser;

    fn config(argv: &[&str]) -> Result<EvalConfig> {
        let args = CliArgs::try_parse_from(argv).expect("arguments should parse");
        EvalConfig::from_args(&args)
    }

    #[test]
    fn defaults() {
        let config = config(&["gemm-eval", "host"]).unwrap();
        assert_eq!((config.problem.m, config.problem.n, config.problem.k), (1024, 1024, 1024));
        assert_eq!((config.num_warmup, config.num_iterations), (3, 10));
        assert_eq!(config.backend(), Backend::Host);
        assert_eq!(config.kernel_name(), "par_iter");
        assert_eq!(config.tolerance, Tolerance::for_dtype(DataType::Fp32));
    }

    #[test]
    fn explicit_dimensions_override_preset() {
        let config = config(&["gemm-eval", "--shape", "qkv-proj", "-N", "64", "host"]).unwrap();
        assert_eq!((config.problem.m, config.problem.k, config.problem.n), (16384, 8192, 64));
    }

    #[test]
    fn correctness_run() {
        let config = config(&["gemm-eval", "--correctness", "-i", "7", "host"]).unwrap();
        assert_eq!((config.num_warmup, config.num_iterations), (0, 1));
        assert_eq!(config.problem.m, 8192);
        assert!(config.debug);
    }

    #[test]
    fn device_kernel_strategy_is_resolved() {
        let config = config(&["gemm-eval", "cuda", "--kernel", "blocked_matmul"]).unwrap();
        match config.target {
            Target::Device(target) => {
                assert_eq!(target.backend, Backend::Cuda);
                assert_eq!(target.kernel.strategy, TilingStrategy::Blocked2d);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn unknown_or_empty_kernel_is_rejected() {
        assert!(matches!(
            config(&["gemm-eval", "opencl", "--kernel", "mystery"]),
            Err(Error::UnknownKernel { .. })
        ));
        assert!(matches!(
            config(&["gemm-eval", "opencl", "--kernel", ""]),
            Err(Error::EmptyKernelName)
        ));
    }

    #[test]
    fn kernel_name_must_stay_inside_the_store() {
        for kernel in ["sub/naive_matmul", "../naive_matmul"] {
            assert!(matches!(
                config(&["gemm-eval", "cuda", "--kernel", kernel, "--tiling", "uniform"]),
                Err(Error::InvalidKernelName { .. })
            ));
        }
    }

    #[test]
    fn tolerance_overrides() {
        let config = config(&["gemm-eval", "--dtype", "bf16", "--atol", "0.5", "host"]).unwrap();
        assert_eq!(config.tolerance.abs, 0.5);
        assert_eq!(config.tolerance.rel, Tolerance::for_dtype(DataType::Bf16).rel);
    }
}

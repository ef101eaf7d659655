//! Command-Line Interface related code.
//!
//! This module handles the parsing of CLI arguments using the [`clap`][1] crate.
//! It defines the available runtime options and backend subcommands. The parsed arguments are
//! turned into a validated [`crate::config::EvalConfig`] before anything runs.
//!
//! [1]: https://crates.io/crates/clap

use crate::{
    check::MismatchPolicy, consts, kernels::host::HostKernelVariant, launch::Tiling,
    problem::DataType,
};

use clap::{Args, Parser, Subcommand, ValueEnum};

use std::path::PathBuf;

/// Throughput evaluation of GEMM kernels.
///
/// Runs a matrix multiplication `C = alpha * A * B + beta * C` through the chosen backend,
/// validates every result against a host reference, and records timing statistics and
/// throughput to a JSON file.
#[derive(Clone, Debug, Parser)]
#[command(name = "gemm-eval", version)]
pub struct CliArgs {
    /// Number of untimed warm-up runs.
    #[arg(
        short = 'w',
        long,
        value_name = "WARMUP",
        default_value_t = consts::NUM_WARMUP,
    )]
    pub num_warmup: u16,

    /// Number of timed runs.
    #[arg(
        short = 'i',
        long,
        value_name = "ITERS",
        default_value_t = consts::NUM_ITERATIONS,
        value_parser = clap::value_parser!(u16).range(1..),
    )]
    pub num_iterations: u16,

    /// Number of rows of `A` and `C`.
    #[arg(short = 'M', long = "m", value_name = "M")]
    pub m: Option<usize>,

    /// Number of columns of `B` and `C`.
    #[arg(short = 'N', long = "n", value_name = "N")]
    pub n: Option<usize>,

    /// Number of columns of `A` and rows of `B`.
    #[arg(short = 'K', long = "k", value_name = "K")]
    pub k: Option<usize>,

    /// Predefined problem shape. Explicit dimensions take precedence.
    #[arg(long, value_enum)]
    pub shape: Option<ShapePreset>,

    /// Correctness run: no warm-up, a single iteration, 8192^3 unless dimensions are given, and
    /// debug logging.
    #[arg(long)]
    pub correctness: bool,

    /// Scaling factor of the `A * B` product.
    #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
    pub alpha: f32,

    /// Scaling factor of the initial `C`.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub beta: f32,

    /// Datatype of the `A` and `B` operands (`C` is always fp32).
    #[arg(long, value_enum, default_value_t = DataType::Fp32)]
    pub dtype: DataType,

    /// What to do when a result does not match the reference.
    #[arg(long, value_enum, default_value_t = MismatchPolicy::Abort)]
    pub on_mismatch: MismatchPolicy,

    /// Absolute tolerance of the correctness check, overriding the datatype's default.
    #[arg(long)]
    pub atol: Option<f64>,

    /// Relative tolerance of the correctness check, overriding the datatype's default.
    #[arg(long)]
    pub rtol: Option<f64>,

    /// Directory receiving the JSON result files.
    #[arg(short, long, default_value = consts::RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Seed for the random number generator (RNG).
    #[arg(short, long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Backend to run the kernel on.
    #[command(subcommand)]
    pub backend: BackendCmd,
}

/// Problem shapes of interest, given as `(M, K, N)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ShapePreset {
    /// Standard square GEMM.
    Matmul,
    /// Fused QKV projection of a 70B-parameter Llama model.
    QkvProj,
    /// Attention output projection of a 70B-parameter Llama model.
    AttnOutput,
    /// Feed-forward GEMM of a 70B-parameter Llama model.
    Ffn,
}

impl ShapePreset {
    /// Returns the `(M, K, N)` dimensions of the preset.
    pub fn dims(self) -> (usize, usize, usize) {
        match self {
            Self::Matmul => (8192, 8192, 8192),
            Self::QkvProj => (16384, 8192, 1280),
            Self::AttnOutput => (16384, 1024, 8192),
            Self::Ffn => (16384, 3584, 8192),
        }
    }
}

/// List of available backends.
#[derive(Clone, Debug, PartialEq, Subcommand)]
pub enum BackendCmd {
    /// Hand-written NVIDIA CUDA C++ kernel, compiled at runtime with NVRTC.
    Cuda(DeviceKernelArgs),
    /// Hand-written OpenCL C kernel, built at runtime.
    Opencl(DeviceKernelArgs),
    /// Host (CPU) GEMM implementation.
    Host {
        /// Host implementation to profile.
        #[arg(short, long, value_enum, default_value_t = HostKernelVariant::ParIter)]
        variant: HostKernelVariant,
    },
}

/// Options shared by the device backends.
#[derive(Clone, Debug, PartialEq, Args)]
pub struct DeviceKernelArgs {
    /// Name of the kernel, i.e. of its source file in the kernel directory.
    #[arg(short, long)]
    pub kernel: String,

    /// Edge of the square thread block of the uniform tiling.
    #[arg(short, long, default_value_t = consts::BLOCK_SIZE)]
    pub block_size: u32,

    /// Tiling strategy, required for kernels the harness does not know.
    #[arg(short, long, value_enum)]
    pub tiling: Option<Tiling>,

    /// Directory holding the kernel sources.
    #[arg(long, default_value = consts::KERNEL_DIR)]
    pub kernel_dir: PathBuf,

    /// Index of the device to run on.
    #[arg(long, default_value_t = 0)]
    pub device: u32,

    /// Extra flag passed to the kernel compiler (can be repeated).
    #[arg(short = 'f', long = "flag", value_name = "FLAG", allow_hyphen_values = true)]
    pub flags: Vec<String>,
}

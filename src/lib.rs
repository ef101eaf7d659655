//! GEMM-EVAL - throughput evaluation of hand-written GEMM kernels
//!
//! # About
//! GEMM-EVAL benchmarks a single-precision general matrix multiplication
//! `C = alpha * A * B + beta * C` written as a CUDA C++ or OpenCL C source file. The kernel is
//! compiled at runtime for the device it runs on, launched with a geometry derived from its tiling
//! strategy, timed on the device timeline and validated against a host reference on every run.
//! Host (CPU) implementations are available as a baseline.
//!
//! `A` and `B` can be stored as fp32, fp16 or bf16; `C` and the accumulation are always fp32.
//!
//! # Quickstart
//! ## Pre-requisites
//! Device backends are optional: build with `--features cuda` (requires the [NVIDIA CUDA
//! Toolkit][1]) and/or `--features opencl` (requires an [OpenCL][2] library).
//!
//! ## Build
//! ```sh
//! cargo build --release --features cuda
//! ```
//!
//! ## Example run
//! To evaluate the blocked CUDA kernel on a 4096 x 4096 x 4096 problem:
//! ```sh
//! cargo run --release --features cuda -- -M 4096 -N 4096 -K 4096 cuda --kernel blocked_matmul
//! ```
//!
//! Kernel sources are looked up as `<kernel-dir>/<backend>/<kernel>.{cu,cl}`. Each run prints a CSV
//! summary on `stdout` and writes a JSON record in the results directory.
//!
//! [1]: https://developer.nvidia.com/cuda-downloads
//! [2]: https://www.khronos.org/opencl/

pub mod check;
pub mod cli;
pub mod config;
pub mod consts;
pub mod device;
pub mod drivers;
pub mod error;
pub mod kernels;
pub mod launch;
pub mod perf_report;
pub mod problem;
pub mod reference;

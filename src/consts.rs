//! Crate-level constants.

/// Default number of warm-up runs performed before the timed iterations.
pub const NUM_WARMUP: u16 = 3;

/// Default number of timed iterations performed when benchmarking a kernel.
pub const NUM_ITERATIONS: u16 = 10;

/// Default matrix dimension used for `M`, `N` and `K` when neither a value nor a shape preset is
/// given.
pub const DEFAULT_DIM: usize = 1024;

/// Matrix dimension used by correctness runs.
pub const CORRECTNESS_DIM: usize = 8192;

/// Default edge of the square thread block used by the uniform tiling strategy.
pub const BLOCK_SIZE: u32 = 16;

/// Maximum number of threads in a single block.
pub const MAX_THREADS_PER_BLOCK: u32 = 1024;

/// Output tile edge of the 1D blocked kernel.
pub const BLOCKED_1D_TILE: u32 = 64;

/// Depth of the K-slice staged in shared memory by the 1D blocked kernel.
// NOTE: the 1D blocked kernel launches one thread per (tile row, K-slice column) pair.
pub const BLOCKED_1D_DEPTH: u32 = 8;

/// Output tile edge of the 2D blocked kernel.
pub const BLOCKED_2D_TILE: u32 = 32;

/// Name of the kernel function every kernel source file must export.
pub const KERNEL_ENTRY_POINT: &str = "matmul_kernel";

/// Default directory holding the kernel sources, one sub-directory per backend.
pub const KERNEL_DIR: &str = "kernels";

/// Default directory receiving the JSON result files.
pub const RESULTS_DIR: &str = "results";

//! Launch configuration of the device kernels.
//!
//! Each kernel tiles the output matrix `C` its own way, which dictates both the shape of a
//! thread block and the number of blocks. The set of tiling strategies is closed: supporting a
//! new kernel layout means adding a variant here.

use crate::{
    consts::{
        BLOCKED_1D_DEPTH, BLOCKED_1D_TILE, BLOCKED_2D_TILE, BLOCK_SIZE, MAX_THREADS_PER_BLOCK,
    },
    error::{Error, Result},
};

use clap::ValueEnum;

use std::fmt;

/// Tiling strategy selector, as named on the command-line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Tiling {
    /// 64x64 output tiles computed by a one-dimensional block of 64x8 threads.
    Blocked1d,
    /// 32x32 output tiles computed by a 32x32 thread block.
    Blocked2d,
    /// Square `block_size` x `block_size` tiles, one thread per output element.
    Uniform,
}

/// Kernels shipped in the kernel store and the tiling they are written for.
pub const KNOWN_KERNELS: &[(&str, Tiling)] = &[
    ("1d_blocked_matmul", Tiling::Blocked1d),
    ("blocked_matmul", Tiling::Blocked2d),
    ("naive_matmul", Tiling::Uniform),
];

/// Tiling strategy resolved with its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TilingStrategy {
    Blocked1d,
    Blocked2d,
    Uniform { block_size: u32 },
}

impl TilingStrategy {
    /// Resolves the strategy of `kernel`.
    ///
    /// An explicit `tiling` always wins. Otherwise the kernel must be one of [`KNOWN_KERNELS`]:
    /// unknown kernels are rejected rather than launched with a guessed geometry.
    pub fn resolve(kernel: &str, tiling: Option<Tiling>, block_size: u32) -> Result<Self> {
        let tiling = match tiling {
            Some(tiling) => tiling,
            None => KNOWN_KERNELS
                .iter()
                .find(|(name, _)| *name == kernel)
                .map(|(_, tiling)| *tiling)
                .ok_or_else(|| Error::UnknownKernel {
                    name: kernel.to_owned(),
                })?,
        };
        Self::new(tiling, block_size)
    }

    pub fn new(tiling: Tiling, block_size: u32) -> Result<Self> {
        match tiling {
            Tiling::Blocked1d => Ok(Self::Blocked1d),
            Tiling::Blocked2d => Ok(Self::Blocked2d),
            Tiling::Uniform => {
                if block_size == 0
                    || block_size.saturating_mul(block_size) > MAX_THREADS_PER_BLOCK
                {
                    return Err(Error::InvalidBlockSize {
                        block_size,
                        max_threads: MAX_THREADS_PER_BLOCK,
                    });
                }
                Ok(Self::Uniform { block_size })
            }
        }
    }

    /// Output tile computed by one block, as `(width, height)`.
    pub fn tile(&self) -> (u32, u32) {
        match *self {
            Self::Blocked1d => (BLOCKED_1D_TILE, BLOCKED_1D_TILE),
            Self::Blocked2d => (BLOCKED_2D_TILE, BLOCKED_2D_TILE),
            Self::Uniform { block_size } => (block_size, block_size),
        }
    }

    /// Shape of one thread block.
    pub fn block(&self) -> Dim3 {
        match *self {
            Self::Blocked1d => Dim3::x(BLOCKED_1D_TILE * BLOCKED_1D_DEPTH),
            Self::Blocked2d => Dim3::xy(BLOCKED_2D_TILE, BLOCKED_2D_TILE),
            Self::Uniform { block_size } => Dim3::xy(block_size, block_size),
        }
    }
}

impl Default for TilingStrategy {
    fn default() -> Self {
        Self::Uniform {
            block_size: BLOCK_SIZE,
        }
    }
}

impl fmt::Display for TilingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked1d => write!(f, "1D blocked"),
            Self::Blocked2d => write!(f, "2D blocked"),
            Self::Uniform { block_size } => write!(f, "uniform ({block_size}x{block_size})"),
        }
    }
}

/// Three-dimensional extent of a block or a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn x(x: u32) -> Self {
        Self { x, y: 1, z: 1 }
    }

    pub const fn xy(x: u32, y: u32) -> Self {
        Self { x, y, z: 1 }
    }

    /// Total number of elements of the extent.
    pub fn volume(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Block and grid shapes of one kernel launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub block: Dim3,
    pub grid: Dim3,
    /// Output tile `(width, height)` covered by one block.
    pub tile: (u32, u32),
}

impl LaunchGeometry {
    /// Global work size, i.e. the total number of threads along each dimension.
    pub fn global(&self) -> Dim3 {
        Dim3 {
            x: self.grid.x * self.block.x,
            y: self.grid.y * self.block.y,
            z: self.grid.z * self.block.z,
        }
    }
}

impl fmt::Display for LaunchGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid {} x block {}", self.grid, self.block)
    }
}

/// Derives the launch geometry of `strategy` for an `m x n` output (`k` does not influence the
/// grid).
///
/// Blocks along the edges may be partially out of range when `m` or `n` is not a multiple of the
/// tile; the kernels are responsible for their own bounds checks.
pub fn configure(
    strategy: TilingStrategy,
    m: usize,
    n: usize,
    _k: usize,
) -> Result<LaunchGeometry> {
    let (tile_w, tile_h) = strategy.tile();
    let block = strategy.block();
    let grid_x = n.div_ceil(tile_w as usize);
    let grid_y = m.div_ceil(tile_h as usize);

    let overflow = || Error::GridOverflow {
        grid: format!("({grid_x}, {grid_y}, 1)"),
    };
    let grid = Dim3::xy(
        u32::try_from(grid_x).map_err(|_| overflow())?,
        u32::try_from(grid_y).map_err(|_| overflow())?,
    );
    // The global work size must stay addressable too.
    if grid.x.checked_mul(block.x).is_none() || grid.y.checked_mul(block.y).is_none() {
        return Err(overflow());
    }

    Ok(LaunchGeometry {
        block,
        grid,
        tile: (tile_w, tile_h),
    })
}

//! Problem descriptor and host-side operands.
//!
//! A GEMM problem computes `C = alpha * A * B + beta * C` with `A` of shape `M x K`, `B` of shape
//! `K x N` and `C` of shape `M x N`, all stored row-major. `A` and `B` are stored in the problem's
//! element datatype while `C` is always single precision.

use crate::error::{Error, Result};

use clap::ValueEnum;
use half::{bf16, f16};
use rand::{distributions::Uniform, prelude::*, rngs::SmallRng};
use serde::Serialize;

use std::{fmt, mem::size_of};

/// Element datatype of the `A` and `B` operands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Fp32,
    Fp16,
    Bf16,
}

impl DataType {
    /// Size in bytes of one element.
    pub fn size_of(self) -> usize {
        match self {
            Self::Fp32 => size_of::<f32>(),
            Self::Fp16 => size_of::<f16>(),
            Self::Bf16 => size_of::<bf16>(),
        }
    }

    /// Rounds `value` to the nearest value representable in this datatype.
    pub fn round(self, value: f32) -> f32 {
        match self {
            Self::Fp32 => value,
            Self::Fp16 => f16::from_f32(value).to_f32(),
            Self::Bf16 => bf16::from_f32(value).to_f32(),
        }
    }

    /// Encodes `values` in this datatype using the host's native byte order.
    pub fn encode(self, values: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(values.len() * self.size_of());
        for &v in values {
            match self {
                Self::Fp32 => bytes.extend_from_slice(&v.to_ne_bytes()),
                Self::Fp16 => bytes.extend_from_slice(&f16::from_f32(v).to_ne_bytes()),
                Self::Bf16 => bytes.extend_from_slice(&bf16::from_f32(v).to_ne_bytes()),
            }
        }
        bytes
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fp32 => write!(f, "fp32"),
            Self::Fp16 => write!(f, "fp16"),
            Self::Bf16 => write!(f, "bf16"),
        }
    }
}

/// Decodes native-endian single-precision values.
pub fn f32_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(size_of::<f32>())
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Immutable description of one GEMM problem.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Problem {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub beta: f32,
    pub dtype: DataType,
}

impl Problem {
    pub fn new(
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        beta: f32,
        dtype: DataType,
    ) -> Result<Self> {
        let valid = |d: usize| d > 0 && i32::try_from(d).is_ok();
        if !(valid(m) && valid(n) && valid(k)) {
            return Err(Error::InvalidDimensions { m, n, k });
        }
        Ok(Self {
            m,
            n,
            k,
            alpha,
            beta,
            dtype,
        })
    }

    /// Size in bytes of the `A` buffer.
    pub fn nb_bytes_a(&self) -> usize {
        self.m * self.k * self.dtype.size_of()
    }

    /// Size in bytes of the `B` buffer.
    pub fn nb_bytes_b(&self) -> usize {
        self.k * self.n * self.dtype.size_of()
    }

    /// Size in bytes of the `C` buffer.
    pub fn nb_bytes_c(&self) -> usize {
        self.m * self.n * size_of::<f32>()
    }

    /// Number of floating-point operations of one multiplication.
    pub fn nb_flops(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "M {} x K {} x N {} alpha: {}, beta: {} ({})",
            self.m, self.k, self.n, self.alpha, self.beta, self.dtype
        )
    }
}

/// Dense row-major host matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::SizeMismatch {
                what: "matrix data",
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.data[i * size + i] = 1.0;
        }
        m
    }

    /// Produces a matrix filled with values drawn uniformly from `[-1.0, 1.0)` and rounded to
    /// `dtype`.
    pub fn random<R: Rng>(rows: usize, cols: usize, dtype: DataType, rng: &mut R) -> Self {
        let between = Uniform::new(-1.0_f32, 1.0_f32);
        let data = (0..rows * cols)
            .map(|_| dtype.round(between.sample(rng)))
            .collect();
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    fn rounded(mut self, dtype: DataType) -> Self {
        self.data.iter_mut().for_each(|v| *v = dtype.round(*v));
        self
    }
}

/// Host-side `A`, `B` and `C` operands of a problem.
#[derive(Clone, Debug)]
pub struct Operands {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
}

impl Operands {
    /// Wraps user-provided matrices after checking their shapes against `problem`.
    ///
    /// `A` and `B` are rounded to the problem's datatype so that the reference computation sees
    /// exactly the values the device receives.
    pub fn new(problem: &Problem, a: Matrix, b: Matrix, c: Matrix) -> Result<Self> {
        check_shape("A", &a, problem.m, problem.k)?;
        check_shape("B", &b, problem.k, problem.n)?;
        check_shape("C", &c, problem.m, problem.n)?;
        Ok(Self {
            a: a.rounded(problem.dtype),
            b: b.rounded(problem.dtype),
            c,
        })
    }

    /// Generates random operands. The same seed always yields the same operands.
    pub fn random(problem: &Problem, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            a: Matrix::random(problem.m, problem.k, problem.dtype, &mut rng),
            b: Matrix::random(problem.k, problem.n, problem.dtype, &mut rng),
            c: Matrix::random(problem.m, problem.n, DataType::Fp32, &mut rng),
        }
    }
}

fn check_shape(what: &'static str, matrix: &Matrix, rows: usize, cols: usize) -> Result<()> {
    if matrix.rows != rows || matrix.cols != cols {
        return Err(Error::SizeMismatch {
            what,
            expected: rows * cols,
            actual: matrix.rows * matrix.cols,
        });
    }
    Ok(())
}

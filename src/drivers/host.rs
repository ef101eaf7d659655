//! Host kernel driver.
//!
//! This module implements the driver function responsible for profiling the GEMM kernels on the
//! host (CPU).

use crate::{
    check::{self, MismatchPolicy, Tolerance},
    error::Result,
    kernels::host::HostKernelVariant,
    problem::{Operands, Problem},
};

use super::TestOutcome;

use std::time::Instant;

/// Host driver for the GEMM kernel.
///
/// This function selects the correct host kernel given `variant`, times a single execution on a
/// fresh copy of `C` and checks the result against `expected`.
pub fn gemm(
    problem: &Problem,
    operands: &Operands,
    expected: &[f32],
    variant: HostKernelVariant,
    tolerance: Tolerance,
    policy: MismatchPolicy,
) -> Result<TestOutcome> {
    let kernel = variant.kernel::<f32>();
    let mut c = operands.c.as_slice().to_vec();

    let start = Instant::now();
    kernel(
        problem.m,
        problem.n,
        problem.k,
        problem.alpha,
        operands.a.as_slice(),
        operands.b.as_slice(),
        problem.beta,
        &mut c,
    );
    let elapsed_ms = start.elapsed().as_secs_f32() * 1e3;

    let report = check::compare(&c, expected, problem.n, tolerance)?;
    let report = policy.apply(report)?;

    Ok(TestOutcome { elapsed_ms, report })
}

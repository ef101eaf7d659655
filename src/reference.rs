//! Reference computation.
//!
//! The reference result is computed on the host in double precision from the exact operand values
//! sent to the device, then rounded back to single precision.

use crate::{
    kernels::host::par_iter_gemm,
    problem::{Operands, Problem},
};

/// Computes `alpha * A * B + beta * C` without touching `operands`.
pub fn gemm(problem: &Problem, operands: &Operands) -> Vec<f32> {
    let widen = |v: &[f32]| v.iter().map(|&x| x as f64).collect::<Vec<_>>();
    let a = widen(operands.a.as_slice());
    let b = widen(operands.b.as_slice());
    let mut c = widen(operands.c.as_slice());

    par_iter_gemm(
        problem.m,
        problem.n,
        problem.k,
        problem.alpha as f64,
        &a,
        &b,
        problem.beta as f64,
        &mut c,
    );

    c.into_iter().map(|x| x as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{DataType, Matrix};

    #[test]
    fn beta_scales_the_initial_c() {
        let p0 = Problem::new(2, 2, 2, 1.0, 0.0, DataType::Fp32).unwrap();
        let p1 = Problem { beta: 1.0, ..p0 };
        let ops = Operands::new(
            &p0,
            Matrix::identity(2),
            Matrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            Matrix::new(2, 2, vec![10.0; 4]).unwrap(),
        )
        .unwrap();

        assert_eq!(gemm(&p0, &ops), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(gemm(&p1, &ops), [11.0, 12.0, 13.0, 14.0]);
        // Operands are left untouched.
        assert_eq!(ops.c.as_slice(), [10.0; 4]);
    }
}

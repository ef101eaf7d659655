//! Correctness checking of computed results against a reference.

use crate::{
    error::{Error, Result},
    problem::DataType,
};

use clap::ValueEnum;
use serde::Serialize;
use tracing::warn;

use std::fmt;

/// Absolute/relative tolerance.
///
/// An element passes when `|actual - expected| <= abs + rel * |expected|`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Tolerance {
    pub abs: f64,
    pub rel: f64,
}

impl Tolerance {
    pub const fn new(abs: f64, rel: f64) -> Self {
        Self { abs, rel }
    }

    /// Purely absolute tolerance.
    pub const fn absolute(abs: f64) -> Self {
        Self { abs, rel: 0.0 }
    }

    /// Default tolerance for results computed from operands of type `dtype`.
    pub fn for_dtype(dtype: DataType) -> Self {
        match dtype {
            DataType::Fp32 => Self::new(1e-3, 1e-3),
            DataType::Fp16 => Self::new(1e-2, 1e-2),
            DataType::Bf16 => Self::new(5e-2, 1.6e-2),
        }
    }

    fn bound(&self, expected: f64) -> f64 {
        self.abs + self.rel * expected.abs()
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atol {:e}, rtol {:e}", self.abs, self.rel)
    }
}

/// What to do when a result does not match the reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum MismatchPolicy {
    /// Fail the test (and the whole run).
    #[default]
    Abort,
    /// Log the mismatch and keep the timing.
    Record,
}

impl MismatchPolicy {
    /// Turns a failed report into an error when aborting, logs it otherwise.
    pub fn apply(self, report: CheckReport) -> Result<CheckReport> {
        if report.passed() {
            return Ok(report);
        }
        match self {
            Self::Abort => Err(Error::Mismatch(Box::new(report))),
            Self::Record => {
                warn!("Result mismatch recorded: {report}");
                Ok(report)
            }
        }
    }
}

/// Location and magnitude of a mismatching element.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Mismatch {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub expected: f32,
    pub actual: f32,
    pub deviation: f64,
}

/// Outcome of a comparison.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckReport {
    pub nb_elems: usize,
    pub nb_mismatches: usize,
    pub first_mismatch: Option<Mismatch>,
    /// Largest deviation over all elements, `NaN` if any element is `NaN`.
    pub max_deviation: f64,
    pub tolerance: Tolerance,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.nb_mismatches == 0
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first_mismatch {
            None => write!(
                f,
                "{} elements within tolerance ({}), max deviation {:e}",
                self.nb_elems, self.tolerance, self.max_deviation
            ),
            Some(first) => write!(
                f,
                "{} of {} elements outside tolerance ({}); first at [{}, {}] (index {}): expected {}, got {} (deviation {:e}); max deviation {:e}",
                self.nb_mismatches,
                self.nb_elems,
                self.tolerance,
                first.row,
                first.col,
                first.index,
                first.expected,
                first.actual,
                first.deviation,
                self.max_deviation,
            ),
        }
    }
}

/// Compares `actual` against `expected`, both row-major with `cols` columns.
///
/// This never fails on a numerical mismatch: it reports it. Only slices of different lengths are
/// an error.
pub fn compare(
    actual: &[f32],
    expected: &[f32],
    cols: usize,
    tolerance: Tolerance,
) -> Result<CheckReport> {
    if actual.len() != expected.len() {
        return Err(Error::SizeMismatch {
            what: "result",
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    let cols = cols.max(1);
    let mut nb_mismatches = 0;
    let mut first_mismatch = None;
    let mut max_deviation = 0.0_f64;

    for (index, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        let deviation = (a as f64 - e as f64).abs();
        if deviation.is_nan() || deviation > max_deviation {
            max_deviation = deviation;
        }
        // Written so that `NaN` never passes.
        if !(deviation <= tolerance.bound(e as f64)) {
            nb_mismatches += 1;
            first_mismatch.get_or_insert(Mismatch {
                index,
                row: index / cols,
                col: index % cols,
                expected: e,
                actual: a,
                deviation,
            });
        }
    }

    Ok(CheckReport {
        nb_elems: actual.len(),
        nb_mismatches,
        first_mismatch,
        max_deviation,
        tolerance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<f32> {
        (0..24).map(|i| i as f32 - 12.0).collect()
    }

    #[test]
    fn identical_inputs_pass() {
        let x = sample();
        let report = compare(&x, &x, 6, Tolerance::absolute(0.0)).unwrap();
        assert!(report.passed());
        assert_eq!(report.max_deviation, 0.0);
        assert_eq!(report.nb_elems, 24);
    }

    #[test]
    fn deviation_within_tolerance_passes() {
        let x = sample();
        let y: Vec<f32> = x.iter().map(|v| v + 0.25).collect();
        assert!(compare(&y, &x, 6, Tolerance::absolute(0.25)).unwrap().passed());
    }

    #[test]
    fn single_deviation_above_tolerance_fails() {
        let x = sample();
        let mut y = x.clone();
        y[13] += 0.5;
        let report = compare(&y, &x, 6, Tolerance::absolute(0.25)).unwrap();
        assert!(!report.passed());
        assert_eq!(report.nb_mismatches, 1);
        let first = report.first_mismatch.unwrap();
        assert_eq!((first.index, first.row, first.col), (13, 2, 1));
        assert_eq!(first.deviation, 0.5);
        assert!(report.to_string().contains("[2, 1]"));
    }

    #[test]
    fn relative_part_scales_with_magnitude() {
        let tol = Tolerance::new(0.0, 1e-2);
        assert!(compare(&[100.5], &[100.0], 1, tol).unwrap().passed());
        assert!(!compare(&[1.5], &[1.0], 1, tol).unwrap().passed());
    }

    #[test]
    fn nan_never_passes() {
        let report = compare(&[f32::NAN], &[1.0], 1, Tolerance::absolute(f64::MAX)).unwrap();
        assert!(!report.passed());
        assert!(report.max_deviation.is_nan());
    }

    #[test]
    fn policy_decides_whether_a_mismatch_is_fatal() {
        let report = compare(&[2.0], &[1.0], 1, Tolerance::absolute(0.5)).unwrap();
        assert!(matches!(
            MismatchPolicy::Abort.apply(report.clone()),
            Err(Error::Mismatch(_))
        ));
        assert!(!MismatchPolicy::Record.apply(report).unwrap().passed());
    }

    #[test]
    fn length_mismatch_is_an_error() {
        assert!(compare(&[1.0], &[1.0, 2.0], 2, Tolerance::absolute(1.0)).is_err());
    }
}

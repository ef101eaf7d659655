//! Performance report related structures and functions.
//!
//! This module defines the data structures needed to generate performance reports out of the
//! recorded execution times of a benchmarked kernel, and to persist them: each run produces one
//! [`ResultRecord`], written as a JSON file and summarized as a CSV line.

use crate::{
    config::EvalConfig,
    error::{Error, Result},
    kernels::Backend,
    problem::DataType,
};

use chrono::{DateTime, Local};
use serde::Serialize;
use statistical::{mean, median, standard_deviation};

use std::{
    fmt, fs,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Statistics over the recorded execution times, all in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TimingStats {
    pub mean: f64,
    /// Sample standard deviation, zero for a single sample.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub total_time: f64,
}

impl TimingStats {
    /// Computes the statistics of `samples`, which must not be empty.
    pub fn new(samples: &[f64]) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::NoIterations);
        }

        let mean_time = mean(samples);
        let std = match samples.len() {
            1 => 0.0,
            _ => standard_deviation(samples, Some(mean_time)),
        };
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(Self {
            mean: mean_time,
            std,
            min,
            max,
            median: median(samples),
            total_time: samples.iter().sum(),
        })
    }

    /// Throughput in TFLOP/s of `nb_samples` multiplications of `nb_flops` operations each.
    pub fn tflops(&self, nb_flops: f64, nb_samples: usize) -> f64 {
        if self.total_time <= 0.0 {
            return 0.0;
        }
        nb_flops * nb_samples as f64 / (self.total_time * 1e-3) / 1e12
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MatrixDims {
    #[serde(rename = "M")]
    pub m: usize,
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(rename = "K")]
    pub k: usize,
    pub alpha: f32,
    pub beta: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Parameters {
    pub num_warmup: u16,
    pub num_iterations: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Performance {
    pub tflops: f64,
}

/// Result of one evaluation run.
#[derive(Clone, Debug, Serialize)]
pub struct ResultRecord {
    pub kernel_type: Backend,
    pub kernel_name: String,
    pub matrix_dims: MatrixDims,
    pub parameters: Parameters,
    pub timing_stats: TimingStats,
    pub performance: Performance,
    pub timestamp: DateTime<Local>,
    pub precision: DataType,
}

impl ResultRecord {
    /// Creates a new `ResultRecord` from the configuration of the run and its timing statistics.
    pub fn new(config: &EvalConfig, timing_stats: TimingStats) -> Self {
        let problem = &config.problem;
        let tflops = timing_stats.tflops(problem.nb_flops(), config.num_iterations.into());

        Self {
            kernel_type: config.backend(),
            kernel_name: config.kernel_name(),
            matrix_dims: MatrixDims {
                m: problem.m,
                n: problem.n,
                k: problem.k,
                alpha: problem.alpha,
                beta: problem.beta,
            },
            parameters: Parameters {
                num_warmup: config.num_warmup,
                num_iterations: config.num_iterations,
            },
            timing_stats,
            performance: Performance { tflops },
            timestamp: Local::now(),
            precision: problem.dtype,
        }
    }

    /// Name of the JSON file the record is written to.
    pub fn file_name(&self) -> String {
        let dims = &self.matrix_dims;
        format!(
            "results_{}_config_{}_{}x{}x{}_{}.json",
            self.kernel_type,
            self.kernel_name,
            dims.m,
            dims.k,
            dims.n,
            self.timestamp.format("%Y%m%d_%H%M%S"),
        )
    }

    /// Writes the record as pretty-printed JSON into `dir`, creating it if needed, and returns
    /// the path of the written file.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(path)
    }

    pub fn print_csv_header(output: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            output,
            "kernel_type,kernel_name,M,N,K,alpha,beta,precision,num_warmup,num_iterations,mean_ms,std_ms,min_ms,max_ms,median_ms,total_ms,TFLOP/s"
        )
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = &self.matrix_dims;
        let stats = &self.timing_stats;
        write!(
            f,
            "{},{},{},{},{},{},{},{},{},{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.2}",
            self.kernel_type,
            self.kernel_name,
            dims.m,
            dims.n,
            dims.k,
            dims.alpha,
            dims.beta,
            self.precision,
            self.parameters.num_warmup,
            self.parameters.num_iterations,
            stats.mean,
            stats.std,
            stats.min,
            stats.max,
            stats.median,
            stats.total_time,
            self.performance.tflops,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_of_samples() {
        let stats = TimingStats::new(&[4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.total_time, 15.0);
        assert!((stats.std - 2.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn single_sample_has_no_spread() {
        let stats = TimingStats::new(&[2.5]).unwrap();
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.median, 2.5);
    }

    #[test]
    fn no_sample_is_an_error() {
        assert!(matches!(TimingStats::new(&[]), Err(Error::NoIterations)));
    }

    #[test]
    fn throughput() {
        // 10 runs of 2 TFLOP in a total of 1 second.
        let stats = TimingStats::new(&[100.0; 10]).unwrap();
        assert!((stats.tflops(2e12, 10) - 20.0).abs() < 1e-9);
    }
}

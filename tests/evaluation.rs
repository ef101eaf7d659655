mod common;

use common::{kernel_dir, FakeRuntime, NAIVE_KERNEL};

use gemm_eval::{
    cli::CliArgs,
    config::{EvalConfig, Target},
    drivers,
    error::{Error, Result},
    kernels::Backend,
    perf_report::{ResultRecord, TimingStats},
    problem::Operands,
    reference,
};

use clap::Parser;

fn try_config(cmdline: &str) -> Result<EvalConfig> {
    let args = CliArgs::try_parse_from(cmdline.split_whitespace())
        .expect("arguments should parse");
    EvalConfig::from_args(&args)
}

fn config(cmdline: &str) -> EvalConfig {
    try_config(cmdline).expect("configuration should be valid")
}

#[test]
fn warm_up_runs_are_not_recorded() {
    let dir = kernel_dir(&[("naive_matmul", NAIVE_KERNEL)]);
    let config = config(&format!(
        "gemm-eval -w 2 -i 3 -M 20 -N 12 -K 5 cuda --kernel naive_matmul --kernel-dir {}",
        dir.path().display()
    ));
    let Target::Device(target) = &config.target else {
        panic!("expected a device target");
    };

    let runtime = FakeRuntime::new();
    let operands = Operands::random(&config.problem, Some(11));
    let expected = reference::gemm(&config.problem, &operands);
    let problem = &config.problem;
    let samples =
        drivers::run_on_device(&runtime, &config, target, problem, &operands, &expected).unwrap();

    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|t| *t >= 0.0));
    assert_eq!(runtime.launches().len(), 5);
    assert_eq!(runtime.loads(), 5);
    assert_eq!(runtime.allocs(), 15);
    assert_eq!(runtime.frees(), 15);
}

#[test]
fn failing_iteration_aborts_the_run() {
    let dir = kernel_dir(&[]);
    let config = config(&format!(
        "gemm-eval -M 4 -N 4 -K 4 cuda --kernel naive_matmul --kernel-dir {}",
        dir.path().display()
    ));
    let Target::Device(target) = &config.target else {
        panic!("expected a device target");
    };

    let runtime = FakeRuntime::new();
    let operands = Operands::random(&config.problem, Some(1));
    let expected = reference::gemm(&config.problem, &operands);
    let problem = &config.problem;
    let err = drivers::run_on_device(&runtime, &config, target, problem, &operands, &expected)
        .unwrap_err();

    assert!(err.is_precondition());
    assert_eq!(runtime.allocs(), 0);
}

#[test]
fn result_record_is_written_as_json() {
    let config = config(
        "gemm-eval -w 0 -i 4 -M 64 -N 32 -K 16 --beta 0.5 cuda --kernel blocked_matmul",
    );
    let stats = TimingStats::new(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    let record = ResultRecord::new(&config, stats);
    assert_eq!(record.kernel_type, Backend::Cuda);

    let dir = tempfile::tempdir().unwrap();
    let results_dir = dir.path().join("results");
    let path = record.write_json(&results_dir).unwrap();

    let file_name = path.file_name().unwrap().to_str().unwrap();
    assert!(file_name.starts_with("results_cuda_config_blocked_matmul_64x16x32_"));
    assert!(file_name.ends_with(".json"));
    assert_eq!(path.parent(), Some(results_dir.as_path()));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["kernel_type"], "cuda");
    assert_eq!(json["kernel_name"], "blocked_matmul");
    assert_eq!(json["matrix_dims"]["M"], 64);
    assert_eq!(json["matrix_dims"]["N"], 32);
    assert_eq!(json["matrix_dims"]["K"], 16);
    assert_eq!(json["matrix_dims"]["beta"], 0.5);
    assert_eq!(json["parameters"]["num_iterations"], 4);
    assert_eq!(json["timing_stats"]["total_time"], 10.0);
    assert_eq!(json["precision"], "fp32");
    assert!(json["timestamp"].is_string());

    // 4 x 2 * 64 * 32 * 16 flops in 10 ms.
    let tflops = json["performance"]["tflops"].as_f64().unwrap();
    assert!((tflops - 4.0 * 65536.0 / 1e-2 / 1e12).abs() < 1e-15);

    let row = record.to_string();
    assert!(row.starts_with("cuda,blocked_matmul,64,32,16,1,0.5,fp32,0,4,2.5000,"));
}

#[test]
fn kernel_outside_the_store_is_rejected_before_running() {
    for kernel in ["sub/naive_matmul", "../naive_matmul", "sub\\naive_matmul"] {
        let err = try_config(&format!(
            "gemm-eval -M 4 -N 4 -K 4 cuda --kernel {kernel} --tiling uniform"
        ))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidKernelName { .. }), "{kernel}");
        assert!(err.is_precondition());
    }
}

#[test]
fn host_backend_is_not_a_device_target() {
    let mut config = config("gemm-eval -M 4 -N 4 -K 4 cuda --kernel naive_matmul");
    if let Target::Device(target) = &mut config.target {
        target.backend = Backend::Host;
    }

    let err = drivers::gemm(&config).unwrap_err();
    assert!(matches!(
        err,
        Error::NotADeviceBackend {
            backend: Backend::Host
        }
    ));
    assert!(err.is_precondition());
}

#[test]
fn zero_iterations_is_an_error() {
    let mut config = config("gemm-eval -M 4 -N 4 -K 4 host");
    config.num_iterations = 0;

    assert!(matches!(drivers::gemm(&config), Err(Error::NoIterations)));
}

#[test]
fn host_evaluation() {
    let config = config("gemm-eval -w 1 -i 2 -M 33 -N 17 -K 9 --seed 3 host --variant seq-iter");

    let record = drivers::gemm(&config).unwrap();

    assert_eq!(record.kernel_type, Backend::Host);
    assert_eq!(record.kernel_name, "seq_iter");
    assert_eq!(record.parameters.num_iterations, 2);
    assert!(record.timing_stats.min <= record.timing_stats.max);
}

#[cfg(not(feature = "cuda"))]
#[test]
fn backend_not_built() {
    let config = config("gemm-eval -M 4 -N 4 -K 4 cuda -k naive_matmul");
    let err = drivers::gemm(&config).unwrap_err();
    assert!(err.is_precondition());
    assert!(err.to_string().contains("`cuda` feature"));
}

use gemm_eval::{
    cli::CliArgs, config::EvalConfig, drivers, error::Result, perf_report::ResultRecord,
};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::{io::Write, process::ExitCode};

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config = EvalConfig::from_args(&args);
    init_logging(config.as_ref().map_or(args.debug, |config| config.debug));

    match config.and_then(|config| run(&config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &EvalConfig) -> Result<()> {
    let record = drivers::gemm(config)?;

    let mut stdout = std::io::stdout().lock();
    ResultRecord::print_csv_header(&mut stdout)?;
    writeln!(stdout, "{record}")?;

    let path = record.write_json(&config.results_dir)?;
    info!("Results saved to {}", path.display());
    Ok(())
}

// `RUST_LOG` takes precedence over `--debug`.
fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

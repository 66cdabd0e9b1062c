use std::process::ExitCode;

use clap::Parser;
use shooter::{
    EXIT_CONFIG, EXIT_FAILED, HttpExecutor,
    cli::{self, ShooterCli},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Opts {
    #[command(flatten)]
    shooter: ShooterCli,

    /// Log level for diagnostics on stderr, overridden by RUST_LOG
    #[clap(long, default_value = "warn", env = "SHOOTER_LOG_LEVEL")]
    log_level: String,
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&opts.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let settings = match opts.shooter.settings() {
        Ok(settings) => settings,
        Err(e) => return config_error(e),
    };
    let executor = match HttpExecutor::new(&settings.run.targets) {
        Ok(executor) => executor,
        Err(e) => return config_error(e),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start the runtime: {e}");
            return ExitCode::from(EXIT_FAILED);
        }
    };

    let result = runtime.block_on(cli::run(&opts.shooter, settings, executor));
    if let Err(e) = &result {
        eprintln!("error: {e:#}");
    }
    ExitCode::from(cli::exit_code(&result))
}

fn config_error(e: impl std::fmt::Display) -> ExitCode {
    eprintln!("error: {e}");
    ExitCode::from(EXIT_CONFIG)
}

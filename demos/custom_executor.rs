use std::{
    process::ExitCode,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use clap::Parser;
use shooter::{
    EXIT_CONFIG, RequestError, RequestExecutor, Response, TargetDescriptor,
    cli::{self, ShooterCli},
};

#[derive(Parser)]
pub struct Opts {
    /// Simulated service time.
    #[clap(long, default_value = "5ms")]
    pub service_time: humantime::Duration,

    /// Every n-th request fails with a transport error.
    #[clap(long, default_value = "50")]
    pub fail_every: u64,

    /// Embed the shooter flags into this Opts.
    #[command(flatten)]
    pub shooter: ShooterCli,
}

/// Pretends to be a remote cache.
struct FakeCache {
    service_time: Duration,
    fail_every: u64,
    calls: AtomicU64,
}

#[async_trait]
impl RequestExecutor for FakeCache {
    async fn execute(&self, target: &TargetDescriptor, _timeout: Duration) -> Result<Response, RequestError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        // spread latencies a little so the histogram has a shape
        let jitter = Duration::from_micros(n % 7 * 300);
        tokio::time::sleep(self.service_time + jitter).await;

        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(RequestError::transport(format!("{}: connection reset", target.endpoint)));
        }
        Ok(Response::new(200, target.template.path.len() as u64 + 64))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let opts = Opts::parse();
    let executor = FakeCache {
        service_time: opts.service_time.into(),
        fail_every: opts.fail_every,
        calls: AtomicU64::new(0),
    };
    let settings = match opts.shooter.settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let result = cli::run(&opts.shooter, settings, executor).await;
    if let Err(e) = &result {
        eprintln!("error: {e:#}");
    }
    ExitCode::from(cli::exit_code(&result))
}

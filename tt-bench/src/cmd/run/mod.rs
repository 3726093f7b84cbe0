use std::{sync::Arc, time::Duration};

use rama::{graceful::ShutdownGuard, telemetry::tracing};

use clap::Args;
use tt_bench_lib::client::{CallRequest, ConnectOptions, Connection, GUEST_USER};

mod error;
mod generator;
mod payload;
mod report;

pub use self::{error::BenchError, generator::LoadGenerator, report::BenchReport};

#[derive(Debug, Clone, Args)]
/// run the benchmark (default command)
pub struct RunCommand {
    /// address of the Tarantool instance (host:port)
    #[arg(long, value_name = "HOST:PORT", default_value = "127.0.0.1:3301")]
    addr: String,

    /// amount of concurrent workers
    #[arg(long, value_name = "N", default_value_t = 1000)]
    conc: usize,

    /// amount of sequential calls issued by every worker
    #[arg(long, value_name = "N", default_value_t = 1000)]
    reqs: u64,

    /// name of the stored function to call
    #[arg(long, alias = "bench_func", default_value = "bench_func")]
    bench_func: String,

    /// size (in characters) of every argument passed to the function
    #[arg(long, alias = "bench_func_arg_size", value_name = "N", default_value_t = 5)]
    bench_func_arg_size: usize,

    /// amount of arguments passed to the function
    #[arg(long, alias = "bench_func_arg_count", value_name = "N", default_value_t = 10)]
    bench_func_arg_count: usize,

    /// user to authenticate as, guest without password skips authentication
    #[arg(long, default_value = GUEST_USER)]
    user: String,

    /// password of the user
    #[arg(long, default_value = "", hide_default_value = true)]
    password: String,

    /// timeout for connect, greeting and authentication (<= 0.0 = no timeout)
    #[arg(long, value_name = "SECONDS", default_value_t = 0.)]
    connect_timeout: f64,

    /// report json instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,
}

/// Immutable parameters of a single bench run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub addr: String,
    pub concurrency: usize,
    pub requests_per_worker: u64,
    pub function: String,
    pub arg_size: usize,
    pub arg_count: usize,
    pub connect: ConnectOptions,
}

impl From<RunCommand> for BenchConfig {
    fn from(args: RunCommand) -> Self {
        Self {
            addr: args.addr,
            concurrency: args.conc,
            requests_per_worker: args.reqs,
            function: args.bench_func,
            arg_size: args.bench_func_arg_size,
            arg_count: args.bench_func_arg_count,
            connect: ConnectOptions {
                user: args.user,
                password: args.password,
                connect_timeout: Duration::try_from_secs_f64(args.connect_timeout)
                    .ok()
                    .filter(|timeout| !timeout.is_zero()),
            },
        }
    }
}

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), BenchError> {
    let json = args.json;
    let cfg = BenchConfig::from(args);

    let report = run(guard, &cfg).await?;

    if json {
        println!("{}", report.to_json());
    } else {
        println!("{report}");
    }

    Ok(())
}

/// Connects once and puts the configured load on that connection.
pub async fn run(guard: ShutdownGuard, cfg: &BenchConfig) -> Result<BenchReport, BenchError> {
    let args = self::payload::build(cfg.arg_size, cfg.arg_count);

    tracing::info!(
        addr = %cfg.addr,
        user = %cfg.connect.user,
        function = %cfg.function,
        arg_size = %cfg.arg_size,
        arg_count = %cfg.arg_count,
        "connect to bench target",
    );

    let conn = tokio::select! {
        _ = guard.cancelled() => {
            tracing::debug!("exit bench before connect: guard shutdown");
            return Err(BenchError::Interrupted);
        }
        result = Connection::connect(&cfg.addr, &cfg.connect) => {
            result.map_err(BenchError::Connect)?
        }
    };
    tracing::debug!(version = %conn.greeting().version, "connected");

    let request = CallRequest {
        function: Arc::from(cfg.function.as_str()),
        args,
    };

    LoadGenerator::new(conn, request, cfg.concurrency, cfg.requests_per_worker)
        .run(guard)
        .await
}

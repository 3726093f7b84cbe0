use std::time::Duration;

use rama::{error::OpaqueError, graceful::ShutdownGuard, telemetry::tracing};

use clap::Args;
use tt_bench_lib::mock::{MockConfig, MockServer};

#[derive(Debug, Clone, Args)]
/// run a mock Tarantool (IPROTO) endpoint to bench against
pub struct MockCommand {
    /// address to bind to
    #[arg(long, short = 'b', value_name = "HOST:PORT", default_value = "127.0.0.1:3301")]
    pub bind: String,

    /// delay applied to every call before it is answered
    #[arg(long, value_name = "SECONDS", default_value_t = 0.)]
    pub latency: f64,

    /// answer the n-th call (1-based, over all connections) with an error
    #[arg(long, value_name = "N")]
    pub fail_at: Option<u64>,
}

pub async fn exec(guard: ShutdownGuard, args: MockCommand) -> Result<(), OpaqueError> {
    let cfg = MockConfig {
        latency: Duration::try_from_secs_f64(args.latency).unwrap_or_default(),
        fail_at: args.fail_at,
    };

    let server = MockServer::bind(&args.bind, cfg.clone()).await?;
    let addr = server.local_addr()?;
    tracing::info!(
        %addr,
        latency = ?cfg.latency,
        fail_at = ?cfg.fail_at,
        "mock IPROTO server ready",
    );

    let stats = server.stats();
    server.serve(guard).await;

    tracing::info!(
        calls = %stats.calls(),
        auths = %stats.auths(),
        "mock IPROTO server stopped",
    );
    Ok(())
}

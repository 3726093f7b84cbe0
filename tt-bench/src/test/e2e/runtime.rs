use std::{net::SocketAddr, time::Duration};

use clap::Parser as _;
use rama::graceful::Shutdown;
use tt_bench_lib::mock::{MockConfig, MockServer, MockStats};

use crate::Args;

/// In-process mock endpoint, stopped when dropped.
pub(super) struct Runtime {
    addr: SocketAddr,
    stats: MockStats,
    _shutdown: Shutdown,
}

impl Runtime {
    #[inline(always)]
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    #[inline(always)]
    pub fn stats(&self) -> &MockStats {
        &self.stats
    }
}

pub(super) async fn spawn_mock(cfg: MockConfig) -> Runtime {
    let server = MockServer::bind("127.0.0.1:0", cfg).await.unwrap();
    let addr = server.local_addr().unwrap();
    assert!(addr.ip().is_loopback());

    let stats = server.stats();
    let shutdown = Shutdown::new(std::future::pending::<()>());
    tokio::spawn(server.serve(shutdown.guard()));

    Runtime {
        addr,
        stats,
        _shutdown: shutdown,
    }
}

pub(super) fn bench_args(addr: &str, extra: &[&str]) -> Args {
    let args = ["tt-bench", "--addr", addr, "--graceful", "5"]
        .into_iter()
        .chain(extra.iter().copied());
    Args::try_parse_from(args).unwrap()
}

pub(super) fn mock_latency(millis: u64) -> MockConfig {
    MockConfig {
        latency: Duration::from_millis(millis),
        ..Default::default()
    }
}

#![allow(unused)]

mod runtime;

use std::time::Duration;

use clap::Parser as _;
use rama::telemetry::tracing;
use tokio::net::TcpListener;
use tt_bench_lib::mock::MockConfig;

use crate::{Args, run_with_args};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_bench_issues_all_requests() {
    let runtime = self::runtime::spawn_mock(MockConfig::default()).await;
    let args = self::runtime::bench_args(&runtime.addr(), &["--conc", "2", "--reqs", "3"]);

    run_with_args(std::future::pending::<()>(), args)
        .await
        .unwrap();

    assert_eq!(runtime.stats().calls(), 6);
    assert_eq!(runtime.stats().auths(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_bench_with_zero_concurrency_or_requests() {
    let runtime = self::runtime::spawn_mock(MockConfig::default()).await;

    for extra in [["--conc", "0", "--reqs", "3"], ["--conc", "4", "--reqs", "0"]] {
        let args = self::runtime::bench_args(&runtime.addr(), &extra);
        run_with_args(std::future::pending::<()>(), args)
            .await
            .unwrap();
    }

    assert_eq!(runtime.stats().calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_bench_authenticates_once() {
    let runtime = self::runtime::spawn_mock(MockConfig::default()).await;
    let args = self::runtime::bench_args(
        &runtime.addr(),
        &[
            "--conc", "3", "--reqs", "2", "--user", "bench", "--password", "secret", "--json",
        ],
    );

    run_with_args(std::future::pending::<()>(), args)
        .await
        .unwrap();

    assert_eq!(runtime.stats().auths(), 1);
    assert_eq!(runtime.stats().calls(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_bench_fails_fast_on_call_error() {
    let runtime = self::runtime::spawn_mock(MockConfig {
        latency: Duration::from_millis(5),
        fail_at: Some(3),
    })
    .await;
    let args = self::runtime::bench_args(&runtime.addr(), &["--conc", "4", "--reqs", "250"]);

    let err = run_with_args(std::future::pending::<()>(), args)
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("Call: "), "{err}");
    assert!(err.to_string().contains("code 32"), "{err}");
    assert!(runtime.stats().calls() < 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_bench_fails_on_unreachable_target() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let args = self::runtime::bench_args(&addr, &["--conc", "2", "--reqs", "3"]);
    let err = run_with_args(std::future::pending::<()>(), args)
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("Connect: "), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_bench_interrupted_by_signal() {
    let runtime = self::runtime::spawn_mock(self::runtime::mock_latency(50)).await;
    let args = self::runtime::bench_args(&runtime.addr(), &["--conc", "2", "--reqs", "1000"]);

    let err = run_with_args(tokio::time::sleep(Duration::from_millis(300)), args)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("interrupted"), "{err}");
    assert!(runtime.stats().calls() < 2000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn test_mock_command_serves_until_shutdown() {
    let args = Args::try_parse_from([
        "tt-bench",
        "mock",
        "--bind",
        "127.0.0.1:0",
        "--latency",
        "0.01",
    ])
    .unwrap();

    run_with_args(tokio::time::sleep(Duration::from_millis(100)), args)
        .await
        .unwrap();
}

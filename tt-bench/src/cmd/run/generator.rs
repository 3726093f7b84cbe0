use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use rama::{
    Service,
    graceful::{Shutdown, ShutdownGuard},
    telemetry::tracing,
};
use tokio::{sync::mpsc, time::Instant};
use tt_bench_lib::client::{CallError, CallRequest};

use super::{BenchError, BenchReport};

/// Drives `concurrency` workers that each issue `requests_per_worker`
/// sequential calls against one shared service.
///
/// The first failing call stops all workers and fails the run.
#[derive(Debug)]
pub struct LoadGenerator<S> {
    service: S,
    request: CallRequest,
    concurrency: usize,
    requests_per_worker: u64,
}

impl<S> LoadGenerator<S>
where
    S: Service<CallRequest, Error = CallError> + Clone + Send + Sync + 'static,
{
    pub fn new(
        service: S,
        request: CallRequest,
        concurrency: usize,
        requests_per_worker: u64,
    ) -> Self {
        Self {
            service,
            request,
            concurrency,
            requests_per_worker,
        }
    }

    pub async fn run(self, guard: ShutdownGuard) -> Result<BenchReport, BenchError> {
        let total = self.concurrency as u64 * self.requests_per_worker;
        let completed = Arc::new(AtomicU64::new(0));
        let first_error = Arc::new(Mutex::new(None));

        let (error_tx, error_rx) = mpsc::channel::<CallError>(1);
        let workers = Shutdown::new(new_worker_signal(
            guard.clone_weak().into_cancelled(),
            error_rx,
            first_error.clone(),
        ));

        tracing::info!(
            concurrency = %self.concurrency,
            requests_per_worker = %self.requests_per_worker,
            %total,
            "start load",
        );

        let start = Instant::now();
        for _ in 0..self.concurrency {
            let worker = Worker {
                service: self.service.clone(),
                request: self.request.clone(),
                requests: self.requests_per_worker,
                completed: completed.clone(),
                error_tx: error_tx.clone(),
            };
            workers.spawn_task_fn(|guard| worker.run(guard));
        }
        drop(error_tx);

        workers.shutdown().await;
        let elapsed = start.elapsed();

        if let Some(err) = first_error.lock().take() {
            return Err(BenchError::Call(err));
        }

        let completed = completed.load(Ordering::Acquire);
        if completed < total {
            tracing::warn!(%completed, %total, "load interrupted");
            return Err(BenchError::Interrupted);
        }

        tracing::info!(%completed, ?elapsed, "load finished");
        Ok(BenchReport {
            requests: completed,
            elapsed,
        })
    }
}

/// Fires on the first call error, on cancellation of the parent,
/// or once every worker dropped its error sender.
fn new_worker_signal(
    parent_cancelled: impl Future<Output = ()> + Send + 'static,
    mut error_rx: mpsc::Receiver<CallError>,
    first_error: Arc<Mutex<Option<CallError>>>,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = parent_cancelled => {
                tracing::debug!("parent guard cancelled: stop workers");
            }
            maybe_err = error_rx.recv() => match maybe_err {
                Some(err) => {
                    tracing::error!("call failed: {err}; stop workers");
                    *first_error.lock() = Some(err);
                }
                None => {
                    tracing::debug!("all workers finished");
                }
            }
        }
    }
}

struct Worker<S> {
    service: S,
    request: CallRequest,
    requests: u64,
    completed: Arc<AtomicU64>,
    error_tx: mpsc::Sender<CallError>,
}

impl<S> Worker<S>
where
    S: Service<CallRequest, Error = CallError> + Send + Sync + 'static,
{
    async fn run(self, guard: ShutdownGuard) {
        for _ in 0..self.requests {
            let result = tokio::select! {
                _ = guard.cancelled() => {
                    tracing::trace!("exit worker early: guard shutdown");
                    return;
                }
                result = self.service.serve(self.request.clone()) => result,
            };

            if let Err(err) = result {
                // capacity of one: only the first error is kept
                let _ = self.error_tx.try_send(err);
                return;
            }
            self.completed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rama::telemetry::tracing;
    use tracing_test::traced_test;
    use tt_bench_lib::iproto::errcode;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct CountingService {
        calls: Arc<AtomicU64>,
        latency: Duration,
        fail_at: Option<u64>,
    }

    impl Service<CallRequest> for CountingService {
        type Output = ();
        type Error = CallError;

        async fn serve(&self, req: CallRequest) -> Result<Self::Output, Self::Error> {
            assert_eq!(&*req.function, "bench_func");
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.fail_at == Some(n) {
                return Err(CallError::Server {
                    code: errcode::ER_PROC_LUA,
                    message: format!("call #{n} failed"),
                });
            }
            Ok(())
        }
    }

    fn request() -> CallRequest {
        CallRequest {
            function: "bench_func".into(),
            args: vec!["aaaaa".to_owned(); 10].into(),
        }
    }

    fn never_cancelled() -> Shutdown {
        Shutdown::new(std::future::pending::<()>())
    }

    #[tokio::test]
    async fn issues_exactly_concurrency_times_requests_calls() {
        let svc = CountingService::default();
        let shutdown = never_cancelled();

        let report = LoadGenerator::new(svc.clone(), request(), 2, 3)
            .run(shutdown.guard())
            .await
            .unwrap();

        assert_eq!(report.requests, 6);
        assert_eq!(svc.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn no_workers_or_no_requests_make_no_calls() {
        let shutdown = never_cancelled();

        for (concurrency, requests) in [(0, 3), (2, 0), (0, 0)] {
            let svc = CountingService::default();
            let report = LoadGenerator::new(svc.clone(), request(), concurrency, requests)
                .run(shutdown.guard())
                .await
                .unwrap();

            assert_eq!(report.requests, 0);
            assert_eq!(svc.calls.load(Ordering::SeqCst), 0);
            assert!(report.rps() == 0. || report.rps().is_nan());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_covers_the_calls_only() {
        let svc = CountingService {
            latency: Duration::from_secs(1),
            ..Default::default()
        };
        let shutdown = never_cancelled();

        let report = LoadGenerator::new(svc.clone(), request(), 3, 4)
            .run(shutdown.guard())
            .await
            .unwrap();

        assert_eq!(report.requests, 12);
        // workers run concurrently, calls within a worker sequentially
        assert_eq!(report.elapsed.as_secs(), 4);
        assert_eq!(report.rps().round(), 3.);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn first_call_error_stops_all_workers() {
        let svc = CountingService {
            latency: Duration::from_millis(10),
            fail_at: Some(5),
            ..Default::default()
        };
        let shutdown = never_cancelled();

        let err = LoadGenerator::new(svc.clone(), request(), 4, 100)
            .run(shutdown.guard())
            .await
            .unwrap_err();

        match err {
            BenchError::Call(CallError::Server { code, message }) => {
                assert_eq!(code, errcode::ER_PROC_LUA);
                assert_eq!(message, "call #5 failed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(svc.calls.load(Ordering::SeqCst) < 400);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_parent_interrupts_the_run() {
        let svc = CountingService {
            latency: Duration::from_millis(100),
            ..Default::default()
        };
        let shutdown = Shutdown::new(tokio::time::sleep(Duration::from_millis(250)));

        let err = LoadGenerator::new(svc.clone(), request(), 2, 10)
            .run(shutdown.guard())
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::Interrupted), "{err}");
        assert!(svc.calls.load(Ordering::SeqCst) < 20);
    }
}

//! Mock IPROTO endpoint.
//!
//! Speaks just enough of the protocol to be benchmarked against:
//! it greets, accepts any `AUTH`, answers `PING` and answers every `CALL`
//! with an empty data array, optionally after a fixed latency.
//! It can be told to fail one specific call to exercise error paths.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::StreamExt as _;
use rama::{
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    telemetry::tracing,
};
use tokio::{
    io::AsyncWriteExt as _,
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::mpsc,
};
use tokio_util::codec::FramedRead;

use crate::{
    iproto::{self, Frame, FrameCodec, Greeting, RequestType, errcode},
    utils,
};

#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Delay applied to every `CALL` before it is answered.
    pub latency: Duration,
    /// Answer the n-th `CALL` (1-based, counted over all connections) with an error.
    pub fail_at: Option<u64>,
}

#[derive(Debug)]
pub struct MockServer {
    listener: TcpListener,
    state: Arc<MockState>,
}

#[derive(Debug)]
struct MockState {
    cfg: MockConfig,
    calls: AtomicU64,
    auths: AtomicU64,
}

/// Counters of a running [`MockServer`].
#[derive(Debug, Clone)]
pub struct MockStats {
    state: Arc<MockState>,
}

impl MockStats {
    /// Number of `CALL` requests received so far.
    pub fn calls(&self) -> u64 {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Number of `AUTH` requests received so far.
    pub fn auths(&self) -> u64 {
        self.state.auths.load(Ordering::SeqCst)
    }
}

impl MockServer {
    pub async fn bind(addr: &str, cfg: MockConfig) -> Result<Self, OpaqueError> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind tcp listener to {addr}"))?;

        Ok(Self {
            listener,
            state: Arc::new(MockState {
                cfg,
                calls: AtomicU64::new(0),
                auths: AtomicU64::new(0),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, OpaqueError> {
        self.listener
            .local_addr()
            .context("get bound address of mock server")
    }

    pub fn stats(&self) -> MockStats {
        MockStats {
            state: self.state.clone(),
        }
    }

    /// Accepts connections until the guard is cancelled.
    pub async fn serve(self, guard: ShutdownGuard) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = guard.cancelled() => {
                    tracing::debug!("exit mock server: guard shutdown");
                    return;
                }
                result = self.listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!("accept mock connection: {err}");
                        continue;
                    }
                }
            };

            tracing::debug!(%peer, "accepted mock connection");
            let state = self.state.clone();
            guard.spawn_task_fn(async move |guard| {
                if let Err(err) = serve_connection(guard, stream, state).await {
                    tracing::debug!(%peer, "mock connection closed with error: {err}");
                }
            });
        }
    }
}

async fn serve_connection(
    guard: ShutdownGuard,
    mut stream: TcpStream,
    state: Arc<MockState>,
) -> Result<(), OpaqueError> {
    stream.set_nodelay(true).context("set TCP_NODELAY")?;

    let salt: [u8; 32] = rand::random();
    stream
        .write_all(&Greeting::encode(utils::env::server_identifier(), &salt))
        .await
        .context("write greeting")?;

    let (reader, writer) = stream.into_split();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_responses(writer, response_rx));

    let mut requests = FramedRead::new(reader, FrameCodec::default());
    loop {
        let request = tokio::select! {
            _ = guard.cancelled() => break,
            maybe_request = requests.next() => match maybe_request {
                Some(request) => request.context("read request")?,
                None => break,
            }
        };

        // answered concurrently, so latency does not serialize a connection
        let state = state.clone();
        let response_tx = response_tx.clone();
        tokio::spawn(async move {
            if let Some(response) = state.respond(request).await {
                let _ = response_tx.send(response);
            }
        });
    }

    drop(response_tx);
    writer.abort();
    Ok(())
}

async fn write_responses(
    mut writer: OwnedWriteHalf,
    mut responses: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(response) = responses.recv().await {
        if let Err(err) = writer.write_all(&response).await {
            tracing::debug!("write mock response: {err}");
            return;
        }
    }
}

impl MockState {
    async fn respond(&self, request: Frame) -> Option<Bytes> {
        let sync = request.header.sync;

        let response = match RequestType::from_code(request.header.code) {
            Some(RequestType::Call) => {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if !self.cfg.latency.is_zero() {
                    tokio::time::sleep(self.cfg.latency).await;
                }
                if self.cfg.fail_at == Some(n) {
                    iproto::encode_error(
                        sync,
                        errcode::ER_PROC_LUA,
                        &format!("mock failure of call #{n}"),
                    )
                } else {
                    iproto::encode_ok(sync)
                }
            }
            Some(RequestType::Auth) => {
                self.auths.fetch_add(1, Ordering::SeqCst);
                iproto::encode_ok(sync)
            }
            Some(RequestType::Ping) => iproto::encode_ok(sync),
            None => iproto::encode_error(
                sync,
                errcode::ER_UNKNOWN_REQUEST_TYPE,
                &format!("Unknown request type {}", request.header.code),
            ),
        };

        match response {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::error!(%sync, "encode mock response: {err}");
                None
            }
        }
    }
}

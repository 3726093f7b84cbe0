//! A single IPROTO connection that can be shared by any number of tasks.
//!
//! Calls are multiplexed over the socket by their sync id: every call
//! encodes its own request, queues it for the writer task and waits for
//! the reader task to hand over the response with the matching sync id.
//! Requests of different callers are therefore in flight at the same time.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use rama::{
    Service,
    error::{ErrorContext as _, OpaqueError},
    telemetry::tracing,
};
use tokio::{io::AsyncReadExt as _, net::TcpStream, sync::mpsc, task::JoinHandle};

use crate::iproto::{self, GREETING_SIZE, Greeting};

mod dispatch;
mod error;

pub use self::error::CallError;

use self::dispatch::{Dispatch, PendingCall};

/// Tarantool's built-in user every connection starts out as.
pub const GUEST_USER: &str = "guest";

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub user: String,
    pub password: String,
    /// Bound on TCP connect, greeting and authentication together.
    pub connect_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            user: GUEST_USER.to_owned(),
            password: String::new(),
            connect_timeout: None,
        }
    }
}

impl ConnectOptions {
    /// Guest without password needs no `AUTH` request:
    /// an unauthenticated session already runs as guest.
    fn is_guest(&self) -> bool {
        self.user == GUEST_USER && self.password.is_empty()
    }
}

/// A call of a stored function with a list of string arguments.
///
/// Cheap to clone: the function name and arguments are shared.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub function: Arc<str>,
    pub args: Arc<[String]>,
}

/// Handle to a shared IPROTO connection.
///
/// Cloning is cheap and all clones use the same socket.
/// The connection is closed once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    greeting: Greeting,
    next_sync: AtomicU64,
    to_writer: mpsc::UnboundedSender<Bytes>,
    dispatch: Arc<Dispatch>,
    reader: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // the writer exits by itself once `to_writer` is dropped
        self.reader.abort();
        self.dispatch.close("connection closed".to_owned());
    }
}

impl Connection {
    /// Connects to `addr` (`host:port`), reads the greeting and,
    /// unless connecting as guest, authenticates with `chap-sha1`.
    pub async fn connect(addr: &str, opts: &ConnectOptions) -> Result<Self, OpaqueError> {
        match opts.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, Self::handshake(addr, opts))
                .await
                .map_err(|_| {
                    OpaqueError::from_display(format!(
                        "connect to {addr} timed out after {timeout:?}"
                    ))
                })?,
            None => Self::handshake(addr, opts).await,
        }
    }

    async fn handshake(addr: &str, opts: &ConnectOptions) -> Result<Self, OpaqueError> {
        let mut stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("tcp connect to {addr}"))?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;

        let mut raw_greeting = [0u8; GREETING_SIZE];
        stream
            .read_exact(&mut raw_greeting)
            .await
            .context("read greeting")?;
        let greeting = Greeting::parse(&raw_greeting).context("parse greeting")?;

        tracing::debug!(%addr, version = %greeting.version, "received server greeting");

        let conn = Self::from_stream(stream, greeting);

        if opts.is_guest() {
            tracing::debug!("connect as guest: skip authentication");
        } else {
            conn.authenticate(&opts.user, &opts.password)
                .await
                .with_context(|| format!("authenticate as user '{}'", opts.user))?;
            tracing::debug!(user = %opts.user, "authenticated");
        }

        Ok(conn)
    }

    fn from_stream(stream: TcpStream, greeting: Greeting) -> Self {
        let (reader, writer) = stream.into_split();
        let dispatch = Arc::new(Dispatch::default());
        let (to_writer, frames) = mpsc::unbounded_channel();

        tokio::spawn(dispatch::write_loop(writer, frames, dispatch.clone()));
        let reader = tokio::spawn(dispatch::read_loop(reader, dispatch.clone()));

        Self {
            inner: Arc::new(Inner {
                greeting,
                next_sync: AtomicU64::new(1),
                to_writer,
                dispatch,
                reader,
            }),
        }
    }

    pub fn greeting(&self) -> &Greeting {
        &self.inner.greeting
    }

    /// Calls the stored function `function` with `args` and waits for the response.
    pub async fn call(
        &self,
        function: &str,
        args: &[String],
    ) -> Result<iproto::Frame, CallError> {
        let sync = self.next_sync();
        let frame = iproto::encode_call(sync, function, args).map_err(CallError::Encode)?;
        self.request(sync, frame).await
    }

    async fn authenticate(&self, user: &str, password: &str) -> Result<(), OpaqueError> {
        let scramble = iproto::auth::scramble(&self.inner.greeting.salt, password)?;
        let sync = self.next_sync();
        let frame = iproto::encode_auth(sync, user, &scramble).context("encode auth request")?;
        self.request(sync, frame).await.context("auth request")?;
        Ok(())
    }

    fn next_sync(&self) -> u64 {
        self.inner.next_sync.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, sync: u64, frame: Bytes) -> Result<iproto::Frame, CallError> {
        let dispatch = &self.inner.dispatch;
        let response = dispatch.register(sync)?;
        let mut pending = PendingCall {
            dispatch,
            sync,
            done: false,
        };

        if self.inner.to_writer.send(frame).is_err() {
            return Err(CallError::Disconnected(
                "connection writer is gone".to_owned(),
            ));
        }

        let result = response
            .await
            .map_err(|_| CallError::Disconnected("connection closed".to_owned()))?;
        pending.done = true;

        let frame = result?;
        match frame.error() {
            Some((code, message)) => Err(CallError::Server { code, message }),
            None => Ok(frame),
        }
    }
}

impl Service<CallRequest> for Connection {
    type Output = iproto::Frame;
    type Error = CallError;

    async fn serve(&self, req: CallRequest) -> Result<Self::Output, Self::Error> {
        self.call(&req.function, &req.args).await
    }
}

use std::{collections::HashMap, io, sync::Arc};

use bytes::Bytes;
use futures::StreamExt as _;
use parking_lot::Mutex;
use rama::telemetry::tracing;
use tokio::{
    io::{AsyncWriteExt as _, BufWriter},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::{mpsc, oneshot},
};
use tokio_util::codec::FramedRead;

use super::CallError;
use crate::iproto::{Frame, FrameCodec};

type ResponseTx = oneshot::Sender<Result<Frame, CallError>>;

/// Book keeping shared between the callers and the reader / writer tasks
/// of a single connection.
///
/// The lock only guards the in-flight map, it is never held across I/O.
#[derive(Debug, Default)]
pub(super) struct Dispatch {
    state: Mutex<DispatchState>,
}

#[derive(Debug, Default)]
struct DispatchState {
    in_flight: HashMap<u64, ResponseTx>,
    /// Set once the connection is lost, no new calls are accepted after that.
    closed: Option<String>,
}

impl Dispatch {
    /// Registers interest in the response with the given sync id.
    pub(super) fn register(
        &self,
        sync: u64,
    ) -> Result<oneshot::Receiver<Result<Frame, CallError>>, CallError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(CallError::Disconnected(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        state.in_flight.insert(sync, tx);
        Ok(rx)
    }

    pub(super) fn forget(&self, sync: u64) {
        self.state.lock().in_flight.remove(&sync);
    }

    fn complete(&self, frame: Frame) {
        let sync = frame.header.sync;
        let Some(tx) = self.state.lock().in_flight.remove(&sync) else {
            tracing::debug!(%sync, "drop response for unknown (or abandoned) request");
            return;
        };
        // receiver gone means the caller gave up on the call
        let _ = tx.send(Ok(frame));
    }

    /// Marks the connection as lost and fails all in-flight calls.
    pub(super) fn close(&self, reason: String) {
        let in_flight = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
            std::mem::take(&mut state.in_flight)
        };

        if !in_flight.is_empty() {
            tracing::debug!(in_flight = in_flight.len(), "fail in-flight calls: {reason}");
        }
        for (_, tx) in in_flight {
            let _ = tx.send(Err(CallError::Disconnected(reason.clone())));
        }
    }

    #[cfg(test)]
    pub(super) fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

/// Removes the in-flight entry of a call that is dropped
/// before its response arrived (e.g. a cancelled worker).
pub(super) struct PendingCall<'a> {
    pub(super) dispatch: &'a Dispatch,
    pub(super) sync: u64,
    pub(super) done: bool,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.dispatch.forget(self.sync);
        }
    }
}

/// Routes every response read from the socket to its caller, by sync id.
pub(super) async fn read_loop(reader: OwnedReadHalf, dispatch: Arc<Dispatch>) {
    let mut frames = FramedRead::new(reader, FrameCodec::default());

    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => dispatch.complete(frame),
            Some(Err(err)) => break format!("read response: {err}"),
            None => break "connection closed by peer".to_owned(),
        }
    };

    tracing::debug!("connection reader exits: {reason}");
    dispatch.close(reason);
}

/// Writes encoded requests to the socket. All frames queued at the time of a
/// write are written before a single flush, so concurrent callers share syscalls.
///
/// Exits once every sender is dropped (connection closed) or the socket fails.
pub(super) async fn write_loop(
    writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    dispatch: Arc<Dispatch>,
) {
    let mut writer = BufWriter::new(writer);

    while let Some(frame) = frames.recv().await {
        if let Err(err) = write_batch(&mut writer, frame, &mut frames).await {
            tracing::debug!("connection writer exits: {err}");
            dispatch.close(format!("write request: {err}"));
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        tracing::debug!("shutdown connection writer: {err}");
    }
}

async fn write_batch(
    writer: &mut BufWriter<OwnedWriteHalf>,
    first: Bytes,
    frames: &mut mpsc::UnboundedReceiver<Bytes>,
) -> io::Result<()> {
    writer.write_all(&first).await?;
    while let Ok(frame) = frames.try_recv() {
        writer.write_all(&frame).await?;
    }
    writer.flush().await
}

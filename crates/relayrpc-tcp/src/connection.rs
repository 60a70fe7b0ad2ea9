//! A TCP connection handle made of `connection_num` lanes.
//!
//! Every lane is a TCP stream owned by a background task that writes queued
//! frames and routes response frames to the lane's pending calls. Calls are
//! spread over the live lanes round-robin.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use relayrpc_core::{ConnectOptions, Connection, ProviderError};

use crate::frame::Frame;
use crate::pending::PendingCalls;
use crate::transport::TcpTransportConfig;

type Ack = oneshot::Sender<Result<(), ProviderError>>;

/// Command sent from callers to a lane task.
enum LaneCommand {
    Write { line: String, ack: Option<Ack> },
    Close,
}

pub(crate) struct Lane {
    index: usize,
    cmd_tx: mpsc::UnboundedSender<LaneCommand>,
    alive: Arc<AtomicBool>,
    pending: PendingCalls,
}

impl Lane {
    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

pub struct TcpConnection {
    id: u64,
    lanes: Vec<Lane>,
    cursor: AtomicUsize,
    next_request_id: AtomicU64,
    closed: AtomicBool,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    created_at: SystemTime,
}

impl TcpConnection {
    /// Connect all lanes to `address`. Fails if any lane fails.
    pub(crate) async fn open(
        id: u64,
        address: &str,
        options: &ConnectOptions,
        config: &TcpTransportConfig,
    ) -> Result<Self, ProviderError> {
        let lanes = options.connection_num.max(1);
        let streams =
            futures::future::try_join_all((0..lanes).map(|_| TcpStream::connect(address))).await?;

        let mut local = None;
        let mut remote = None;
        let mut opened = Vec::with_capacity(lanes);
        for (index, stream) in streams.into_iter().enumerate() {
            stream.set_nodelay(config.nodelay)?;
            if index == 0 {
                local = stream.local_addr().ok();
                remote = stream.peer_addr().ok();
            }
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let alive = Arc::new(AtomicBool::new(true));
            let pending = PendingCalls::new();
            tokio::spawn(lane_task(
                LaneContext {
                    conn: id,
                    index,
                    alive: alive.clone(),
                    pending: pending.clone(),
                    max_frame_bytes: config.max_frame_bytes,
                },
                stream,
                cmd_rx,
            ));
            opened.push(Lane {
                index,
                cmd_tx,
                alive,
                pending,
            });
        }

        Ok(Self {
            id,
            lanes: opened,
            cursor: AtomicUsize::new(0),
            next_request_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            local,
            remote,
            created_at: SystemTime::now(),
        })
    }

    /// Next live lane, round-robin.
    pub(crate) fn pick_lane(&self) -> Result<&Lane, ProviderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::ConnectionClosed(format!("connection {} is closed", self.id)));
        }
        let n = self.lanes.len();
        for _ in 0..n {
            let i = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            if self.lanes[i].is_alive() {
                return Ok(&self.lanes[i]);
            }
        }
        Err(ProviderError::ConnectionClosed(format!(
            "all {n} lanes of connection {} are down",
            self.id
        )))
    }

    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue an encoded frame on `lane`. `ack` fires once it is written.
    pub(crate) fn submit(&self, lane: &Lane, line: String, ack: Option<Ack>) -> Result<(), ProviderError> {
        lane.cmd_tx
            .send(LaneCommand::Write { line, ack })
            .map_err(|_| ProviderError::SendFailed(format!("lane {} of connection {} is closed", lane.index, self.id)))
    }

    /// Stop every lane. Pending calls fail with `ConnectionClosed`.
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for lane in &self.lanes {
            let _ = lane.cmd_tx.send(LaneCommand::Close);
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn live_lanes(&self) -> usize {
        self.lanes.iter().filter(|l| l.is_alive()).count()
    }

    /// Calls waiting for a response across all lanes.
    pub fn pending_calls(&self) -> usize {
        self.lanes.iter().map(|l| l.pending.len()).sum()
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.lanes.iter().any(Lane::is_alive)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn created_at(&self) -> SystemTime {
        self.created_at
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("lanes", &self.lanes.len())
            .field("live_lanes", &self.live_lanes())
            .finish()
    }
}

struct LaneContext {
    conn: u64,
    index: usize,
    alive: Arc<AtomicBool>,
    pending: PendingCalls,
    max_frame_bytes: usize,
}

/// Background task that owns one lane's stream.
async fn lane_task(
    ctx: LaneContext,
    stream: TcpStream,
    mut cmd_rx: mpsc::UnboundedReceiver<LaneCommand>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FrameReader::new(BufReader::new(read_half), ctx.max_frame_bytes);

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(LaneCommand::Close) => break "connection closed by client".to_string(),
                Some(LaneCommand::Write { line, ack }) => {
                    match write_half.write_all(line.as_bytes()).await {
                        Ok(()) => {
                            if let Some(ack) = ack {
                                let _ = ack.send(Ok(()));
                            }
                        }
                        Err(e) => {
                            if let Some(ack) = ack {
                                let _ = ack.send(Err(ProviderError::SendFailed(e.to_string())));
                            }
                            break format!("write failed: {e}");
                        }
                    }
                }
            },
            read = frames.next_frame() => match read {
                Ok(None) => break "connection closed by peer".to_string(),
                Err(reason) => break reason,
                Ok(Some(line)) => handle_line(&ctx, &line),
            }
        }
    };

    // Refuse new writes before failing what is pending, so nothing is
    // registered after the sweep without its write failing.
    cmd_rx.close();
    ctx.alive.store(false, Ordering::SeqCst);
    while let Ok(cmd) = cmd_rx.try_recv() {
        if let LaneCommand::Write { ack: Some(ack), .. } = cmd {
            let _ = ack.send(Err(ProviderError::SendFailed(reason.clone())));
        }
    }
    let failed = ctx.pending.fail_all(&reason);
    let _ = write_half.shutdown().await;
    tracing::info!(conn = ctx.conn, lane = ctx.index, failed, reason = %reason, "lane closed");
}

/// Splits inbound bytes into newline-terminated frames, failing as soon as
/// an unfinished frame grows past `max` bytes.
///
/// `next_frame` is cancel-safe: consumed bytes are kept in `partial`.
struct FrameReader<R> {
    inner: R,
    partial: Vec<u8>,
    max: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    fn new(inner: R, max: usize) -> Self {
        Self {
            inner,
            partial: Vec::new(),
            max,
        }
    }

    /// Next frame without its line ending. `Ok(None)` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<String>, String> {
        loop {
            let buf = self
                .inner
                .fill_buf()
                .await
                .map_err(|e| format!("read failed: {e}"))?;
            if buf.is_empty() {
                return Ok(None);
            }
            let newline = buf.iter().position(|b| *b == b'\n');
            let chunk = newline.unwrap_or(buf.len());
            if self.partial.len() + chunk > self.max {
                return Err(format!("frame exceeds the {} byte limit", self.max));
            }
            self.partial.extend_from_slice(&buf[..chunk]);
            self.inner.consume(newline.map_or(chunk, |i| i + 1));

            if newline.is_some() {
                let mut frame = std::mem::take(&mut self.partial);
                if frame.last() == Some(&b'\r') {
                    frame.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&frame).into_owned()));
            }
        }
    }
}

fn handle_line(ctx: &LaneContext, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match Frame::decode(line) {
        Ok(frame @ Frame::Response { .. }) => {
            let id = frame.id();
            if !ctx.pending.dispatch(frame) {
                tracing::debug!(conn = ctx.conn, lane = ctx.index, id, "response for unknown call discarded");
            }
        }
        Ok(Frame::Request { id, .. }) => {
            tracing::debug!(conn = ctx.conn, lane = ctx.index, id, "ignoring request frame from server");
        }
        Err(e) => {
            tracing::warn!(conn = ctx.conn, lane = ctx.index, error = %e, "undecodable frame skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &'static [u8], max: usize) -> FrameReader<&'static [u8]> {
        FrameReader::new(bytes, max)
    }

    #[tokio::test]
    async fn frames_split_on_newlines() {
        let mut frames = reader(b"one\r\ntwo\n\nthree", 16);
        assert_eq!(frames.next_frame().await.unwrap().as_deref(), Some("one"));
        assert_eq!(frames.next_frame().await.unwrap().as_deref(), Some("two"));
        assert_eq!(frames.next_frame().await.unwrap().as_deref(), Some(""));
        // Unterminated tail is dropped at end of stream.
        assert_eq!(frames.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_frame_fails_before_its_newline() {
        let mut frames = reader(b"12345678\nabcdefghijkl", 8);
        assert_eq!(frames.next_frame().await.unwrap().as_deref(), Some("12345678"));
        let err = frames.next_frame().await.unwrap_err();
        assert!(err.contains("8 byte limit"), "{err}");
    }
}

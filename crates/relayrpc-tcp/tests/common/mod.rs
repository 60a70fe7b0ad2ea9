//! Loopback responder speaking the relayrpc line protocol.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use relayrpc_core::{AppFault, ErrorKind};
use relayrpc_tcp::{Frame, WireError};

#[derive(Default)]
pub struct Stats {
    pub accepted: AtomicUsize,
    pub requests: AtomicUsize,
    pub oneway: AtomicUsize,
    pub last_headers: Mutex<HashMap<String, String>>,
}

/// Start a responder on an ephemeral port.
///
/// Methods: `echo` replies with the args, `slow` waits `args[0]` ms first,
/// `busy` fails with SERVER_BUSY, `fault` replies with an app fault,
/// `silent` never replies, `hangup` closes the connection and `flood` writes
/// `args[0]` bytes without ever ending the line.
pub async fn responder() -> (SocketAddr, Arc<Stats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(Stats::default());
    let accepted = stats.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            accepted.accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(stream, accepted.clone()));
        }
    });
    (addr, stats)
}

async fn serve(stream: TcpStream, stats: Arc<Stats>) {
    let (read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(Frame::Request { id, oneway, headers, method, args, .. }) = Frame::decode(&line) else {
            continue;
        };
        stats.requests.fetch_add(1, Ordering::SeqCst);
        *stats.last_headers.lock().unwrap() = headers;
        if oneway {
            stats.oneway.fetch_add(1, Ordering::SeqCst);
            continue;
        }
        let reply = match method.as_str() {
            "hangup" => return,
            "flood" => {
                let len = args.first().and_then(Value::as_u64).unwrap_or(1 << 20);
                let _ = out_tx.send("x".repeat(len as usize));
                continue;
            }
            "silent" => continue,
            "busy" => Frame::failure(id, WireError::new(ErrorKind::ServerBusy, "queue full")),
            "fault" => Frame::Response {
                id,
                result: None,
                fault: Some(AppFault {
                    kind: "NotFound".into(),
                    message: "no such user".into(),
                    data: None,
                }),
                error: None,
            },
            "slow" => {
                let delay = args.first().and_then(Value::as_u64).unwrap_or(50);
                let out = out_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    let _ = out.send(Frame::reply(id, json!({ "slept": delay })).encode().unwrap());
                });
                continue;
            }
            _ => Frame::reply(id, Value::Array(args)),
        };
        let _ = out_tx.send(reply.encode().unwrap());
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use relayrpc_core::context::HEADER_METHOD_NAME;
use relayrpc_core::{
    ClientRegistry, ClientTransport, ErrorKind, InvokeType, ProviderDescriptor, Request, Response,
    ResponseCallback, ReusePolicy, RpcError, TransportConfig,
};
use relayrpc_tcp::{TcpTransport, TcpTransportConfig};

use common::{eventually, responder};

const SECOND: Duration = Duration::from_secs(1);

fn config(addr: SocketAddr) -> TransportConfig {
    TransportConfig::new(ProviderDescriptor::new(
        addr.ip().to_string(),
        addr.port(),
        "relay",
    ))
}

fn registry() -> ClientRegistry {
    ClientRegistry::new(Arc::new(TcpTransport::default()))
}

async fn connected(registry: &ClientRegistry, config: TransportConfig) -> ClientTransport {
    let transport = registry.transport(config);
    transport.connect().await.unwrap();
    transport
}

fn call(method: &str, args: Vec<serde_json::Value>) -> Request {
    Request::new("com.acme.UserService:1.0", method, args)
}

#[tokio::test]
async fn sync_round_trip_carries_headers() {
    let (addr, stats) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;

    let resp = transport
        .sync_send(call("echo", vec![json!(1), json!("two")]), SECOND)
        .await
        .unwrap();
    assert_eq!(resp.result, Some(json!([1, "two"])));
    assert_eq!(transport.remote_address(), Some(addr));
    assert!(transport.local_address().is_some());
    assert_eq!(
        stats.last_headers.lock().unwrap().get(HEADER_METHOD_NAME).map(String::as_str),
        Some("echo")
    );
    assert_eq!(transport.current_requests(), 0);
}

#[tokio::test]
async fn futures_complete_out_of_order() {
    let (addr, _) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;

    let slow = transport.future_send(call("slow", vec![json!(80)]), SECOND).await.unwrap();
    let fast = transport.future_send(call("echo", vec![json!("x")]), SECOND).await.unwrap();
    assert_eq!(transport.current_requests(), 2);

    assert_eq!(fast.await.unwrap().result, Some(json!(["x"])));
    assert_eq!(transport.current_requests(), 1);
    assert_eq!(slow.await.unwrap().result, Some(json!({ "slept": 80 })));
    assert_eq!(transport.current_requests(), 0);
}

#[tokio::test]
async fn silent_server_times_out() {
    let (addr, _) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;

    let started = std::time::Instant::now();
    let err = transport
        .sync_send(call("silent", vec![]), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(100));

    let future = transport
        .future_send(call("silent", vec![]), Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(future.await.unwrap_err().kind(), ErrorKind::Timeout);
    assert_eq!(transport.current_requests(), 0);

    // The connection survives timeouts.
    assert!(transport.is_available());
}

#[tokio::test]
async fn server_failures_and_faults() {
    let (addr, _) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;

    let err = transport.sync_send(call("busy", vec![]), SECOND).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerBusy);
    assert!(err.cause().is_some());

    let resp = transport.sync_send(call("fault", vec![]), SECOND).await.unwrap();
    let fault = resp.into_result().unwrap_err();
    assert_eq!(fault.kind, "NotFound");
}

#[tokio::test]
async fn oneway_is_transmitted_without_reply() {
    let (addr, stats) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;

    transport
        .send(call("notify", vec![json!({"event": "login"})]), SECOND, InvokeType::OneWay)
        .await
        .unwrap();
    assert!(eventually(|| stats.oneway.load(Ordering::SeqCst) == 1).await);
    assert_eq!(transport.current_requests(), 0);
}

#[derive(Default)]
struct Recorder {
    responses: Mutex<Vec<Response>>,
    failures: AtomicUsize,
}

impl ResponseCallback for Recorder {
    fn on_response(&self, response: Response) {
        self.responses.lock().unwrap().push(response);
    }

    fn on_failure(&self, _error: RpcError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn callback_mode_delivers_once() {
    let (addr, _) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;

    let recorder = Arc::new(Recorder::default());
    transport
        .async_send(call("echo", vec![json!(5)]).with_callback(recorder.clone()), SECOND)
        .await
        .unwrap();

    assert!(eventually(|| recorder.responses.lock().unwrap().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(recorder.responses.lock().unwrap().len(), 1);
    assert_eq!(recorder.failures.load(Ordering::SeqCst), 0);
    assert_eq!(transport.current_requests(), 0);
}

#[tokio::test]
async fn connection_num_opens_lanes() {
    let (addr, stats) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr).with_connection_num(3)).await;
    assert!(eventually(|| stats.accepted.load(Ordering::SeqCst) == 3).await);

    let handle = registry
        .connections()
        .handle(transport.config(), transport.id())
        .unwrap();
    let tcp = TcpTransport::tcp(&handle).unwrap();
    assert_eq!(tcp.lane_count(), 3);

    for i in 0..6 {
        let resp = transport.sync_send(call("echo", vec![json!(i)]), SECOND).await.unwrap();
        assert_eq!(resp.result, Some(json!([i])));
    }
    assert_eq!(stats.requests.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn hangup_fails_pending_calls_with_client_network() {
    let (addr, _) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr).with_reuse(ReusePolicy::Dedicated)).await;

    let pending = transport.future_send(call("silent", vec![]), SECOND).await.unwrap();
    let err = transport.sync_send(call("hangup", vec![]), SECOND).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientNetwork);
    assert_eq!(pending.await.unwrap_err().kind(), ErrorKind::ClientNetwork);

    assert!(eventually(|| !transport.is_available()).await);
    let err = transport.sync_send(call("echo", vec![]), SECOND).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientNetwork);
    assert_eq!(transport.current_requests(), 0);

    // Reconnect gets a fresh connection.
    transport.connect().await.unwrap();
    assert!(transport.sync_send(call("echo", vec![]), SECOND).await.is_ok());
}

#[tokio::test]
async fn disconnect_closes_the_socket() {
    let (addr, _) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;
    let handle = registry
        .connections()
        .handle(transport.config(), transport.id())
        .unwrap();

    transport.disconnect().await;
    transport.disconnect().await;
    assert!(!transport.is_available());
    assert!(eventually(|| TcpTransport::tcp(&handle).unwrap().live_lanes() == 0).await);
}

#[tokio::test]
async fn refused_connection_is_client_network() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let registry = registry();
    let transport = registry.transport(config(addr));
    let err = transport.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientNetwork);
}

#[tokio::test]
async fn unknown_protocol_is_rejected() {
    let (addr, stats) = responder().await;
    let registry = registry();
    let provider = ProviderDescriptor::new(addr.ip().to_string(), addr.port(), "h2c");
    let transport = registry.transport(TransportConfig::new(provider));
    let err = transport.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientNetwork);
    assert_eq!(stats.accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn abandoned_sync_calls_leave_nothing_pending() {
    let (addr, _) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;
    let handle = registry
        .connections()
        .handle(transport.config(), transport.id())
        .unwrap();

    for _ in 0..3 {
        let waiting = transport.sync_send(call("silent", vec![]), Duration::from_millis(500));
        assert!(tokio::time::timeout(Duration::from_millis(20), waiting).await.is_err());
    }
    assert_eq!(transport.current_requests(), 0);
    assert_eq!(TcpTransport::tcp(&handle).unwrap().pending_calls(), 0);
    assert!(transport.is_available());
}

#[tokio::test]
async fn answered_callbacks_clear_their_entries() {
    let (addr, _) = responder().await;
    let registry = registry();
    let transport = connected(&registry, config(addr)).await;
    let handle = registry
        .connections()
        .handle(transport.config(), transport.id())
        .unwrap();

    let future = transport
        .future_send(call("echo", vec![json!(1)]), Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(future.await.is_ok());
    assert_eq!(TcpTransport::tcp(&handle).unwrap().pending_calls(), 0);
}

#[tokio::test]
async fn oversized_frame_drops_the_lane() {
    let (addr, _) = responder().await;
    let tcp = TcpTransport::new(TcpTransportConfig {
        max_frame_bytes: 1024,
        ..TcpTransportConfig::default()
    });
    let registry = ClientRegistry::new(Arc::new(tcp));
    let transport = connected(&registry, config(addr)).await;

    let err = transport
        .sync_send(call("flood", vec![json!(4 * 1024 * 1024)]), SECOND)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientNetwork);
    assert!(eventually(|| !transport.is_available()).await);
    assert_eq!(transport.current_requests(), 0);
}

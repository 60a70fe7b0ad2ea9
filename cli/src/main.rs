//! relayrpc CLI: probe a service provider from the terminal.
//!
//! Usage:
//! ```bash
//! # Open a connection and report its addresses
//! relayrpc ping --provider relay://127.0.0.1:12200
//!
//! # Call a method (sync by default)
//! relayrpc call --provider 127.0.0.1:12200 --service com.acme.Echo:1.0 --method echo --args '["hi"]'
//!
//! # Same call as a future, with the transport config read from a file
//! relayrpc call --config transport.json --service com.acme.Echo:1.0 --method echo --mode future
//! ```

mod logging;

use std::env;
use std::fs;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use serde_json::Value;
use tokio::sync::oneshot;

use relayrpc_core::{
    ClientRegistry, InvokeType, Outcome, ProviderDescriptor, Request, Response, ResponseCallback,
    ReusePolicy, RpcError, SendResult, TransportConfig,
};
use relayrpc_tcp::TcpTransport;

use crate::logging::{init_tracing, LogConfig};

const DEFAULT_TIMEOUT_MS: u64 = 3000;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let rest = &args[2..];
    match log_config(rest) {
        Ok(config) => init_tracing(&config),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }

    let result = match args[1].as_str() {
        "ping" => cmd_ping(rest).await,
        "call" => cmd_call(rest).await,
        "version" | "--version" | "-V" => {
            println!("relayrpc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("relayrpc {}", env!("CARGO_PKG_VERSION"));
    println!("Probe RelayRPC service providers\n");
    println!("USAGE:");
    println!("    relayrpc <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    ping       Connect to a provider and report the connection");
    println!("    call       Invoke a method on a provider");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("CONNECTION FLAGS:");
    println!("    --provider <[proto://]host:port>   Provider address");
    println!("    --config <FILE>                    Transport config (JSON)");
    println!("    --reuse <shared|dedicated>         Connection reuse policy");
    println!("    --connections <N>                  Lanes per connection");
    println!("    --connect-timeout-ms <MS>          Connect timeout\n");
    println!("CALL FLAGS:");
    println!("    --service <NAME>                   Target service  [required]");
    println!("    --method <NAME>                    Method name     [required]");
    println!("    --args <JSON ARRAY>                Arguments (default [])");
    println!("    --mode <sync|future|callback|oneway>");
    println!("    --timeout-ms <MS>                  Call timeout (default {DEFAULT_TIMEOUT_MS})");
    println!("    --generic-type <TYPE>              Mark as a generic call\n");
    println!("LOGGING FLAGS:");
    println!("    --log-level <LEVEL>                Default warn; RUST_LOG overrides");
    println!("    --log-component <CRATE=LEVEL>      Per-crate level, repeatable");
    println!("    --log-json                         JSON log lines on stderr");
}

async fn cmd_ping(args: &[String]) -> anyhow::Result<()> {
    let config = transport_config(args)?;
    let registry = ClientRegistry::new(Arc::new(TcpTransport::default()));
    let transport = registry.transport(config);

    println!("Connecting to {}...", transport.config().provider);
    let start = Instant::now();
    transport.connect().await?;
    let latency = start.elapsed();

    println!("  Status:     {}", transport.state());
    println!("  Local:      {}", addr_or_dash(transport.local_address()));
    println!("  Remote:     {}", addr_or_dash(transport.remote_address()));
    println!("  Reuse:      {}", transport.config().reuse);
    println!("  Latency:    {}ms", latency.as_millis());

    transport.destroy().await;
    registry.shutdown().await;
    Ok(())
}

async fn cmd_call(args: &[String]) -> anyhow::Result<()> {
    let config = transport_config(args)?;
    let request = build_request(args)?;
    let mode: InvokeType = match parse_flag(args, "--mode") {
        Some(m) => m.parse().map_err(|e: RpcError| anyhow!(e))?,
        None => InvokeType::Sync,
    };
    let timeout = Duration::from_millis(parse_num(args, "--timeout-ms")?.unwrap_or(DEFAULT_TIMEOUT_MS));

    tracing::debug!(
        provider = %config.provider,
        service = request.target_service(),
        method = request.method_name(),
        mode = %mode,
        timeout_ms = timeout.as_millis() as u64,
        "cli call"
    );
    let registry = ClientRegistry::new(Arc::new(TcpTransport::default()));
    let transport = registry.transport(config);
    transport.connect().await?;

    let start = Instant::now();
    let outcome = match mode {
        InvokeType::Callback => {
            let (callback, rx) = ChannelCallback::new();
            transport
                .callback_send(request.with_callback(callback), timeout)
                .await?;
            Some(rx.await.context("callback dropped without a result")?)
        }
        _ => match transport.send(request, timeout, mode).await? {
            SendResult::Response(response) => Some(Ok(response)),
            SendResult::Future(future) => Some(future.await),
            SendResult::Sent | SendResult::Dispatched => None,
        },
    };
    let elapsed = start.elapsed();

    transport.destroy().await;
    registry.shutdown().await;

    match outcome {
        None => {
            println!("sent (one-way, {}ms)", elapsed.as_millis());
            Ok(())
        }
        Some(Ok(response)) => {
            print_response(response)?;
            eprintln!("({mode}, {}ms)", elapsed.as_millis());
            Ok(())
        }
        Some(Err(e)) => Err(anyhow!(e)),
    }
}

fn print_response(response: Response) -> anyhow::Result<()> {
    match response.into_result() {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(fault) => {
            println!("fault: {fault}");
            if let Some(data) = fault.data {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
        }
    }
    Ok(())
}

/// Callback that forwards the outcome to a oneshot channel.
struct ChannelCallback {
    tx: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl ChannelCallback {
    fn new() -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Self { tx: Mutex::new(Some(tx)) }), rx)
    }

    fn forward(&self, outcome: Outcome) {
        let tx = self.tx.lock().ok().and_then(|mut slot| slot.take());
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }
}

impl ResponseCallback for ChannelCallback {
    fn on_response(&self, response: Response) {
        self.forward(Ok(response));
    }

    fn on_failure(&self, error: RpcError) {
        self.forward(Err(error));
    }
}

// ── Flag parsing ─────────────────────────────────────────────────────────────

fn transport_config(args: &[String]) -> anyhow::Result<TransportConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str::<TransportConfig>(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => {
            let provider = parse_flag(args, "--provider").ok_or_else(|| anyhow!("--provider or --config is required"))?;
            TransportConfig::new(provider.parse::<ProviderDescriptor>()?)
        }
    };

    if let Some(provider) = parse_flag(args, "--provider") {
        config.provider = provider.parse()?;
    }
    if let Some(reuse) = parse_flag(args, "--reuse") {
        config.reuse = match reuse.as_str() {
            "shared" => ReusePolicy::Shared,
            "dedicated" => ReusePolicy::Dedicated,
            other => bail!("unknown reuse policy '{other}'"),
        };
    }
    if let Some(n) = parse_num(args, "--connections")? {
        config.connection_num = n as usize;
    }
    if let Some(ms) = parse_num(args, "--connect-timeout-ms")? {
        config.connect_timeout_ms = ms;
    }
    Ok(config)
}

fn build_request(args: &[String]) -> anyhow::Result<Request> {
    let service = parse_flag(args, "--service").ok_or_else(|| anyhow!("--service is required"))?;
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let call_args = match parse_flag(args, "--args") {
        Some(raw) => match serde_json::from_str::<Value>(&raw).context("--args must be JSON")? {
            Value::Array(items) => items,
            other => vec![other],
        },
        None => Vec::new(),
    };

    let mut request = Request::new(service, method, call_args);
    if let Some(generic) = parse_flag(args, "--generic-type") {
        request = request.with_generic_type(generic);
    }
    Ok(request)
}

fn log_config(args: &[String]) -> anyhow::Result<LogConfig> {
    let mut config = LogConfig::default();
    if let Some(level) = parse_flag(args, "--log-level") {
        config.level = level;
    }
    for component in parse_flags(args, "--log-component") {
        config.add_component(&component)?;
    }
    config.json = args.iter().any(|a| a == "--log-json");
    Ok(config)
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

/// Every value given for a repeatable flag.
fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}

fn parse_num(args: &[String], flag: &str) -> anyhow::Result<Option<u64>> {
    parse_flag(args, flag)
        .map(|raw| raw.parse::<u64>().with_context(|| format!("{flag} expects a number, got '{raw}'")))
        .transpose()
}

fn addr_or_dash(addr: Option<std::net::SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string())
}

//! Standalone controller entry point.
//!
//! Starts the control-plane server on a given address and reads
//! `<recipient> <type> [body]` triples from stdin, injecting each as a
//! local message into the named process. Exits cleanly on EOF or
//! `SIGINT`.

use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use dst_controller::{Controller, ControllerConfig};
use dst_wire::Envelope;

/// Deterministic distributed-systems test harness controller.
#[derive(Debug, Parser)]
#[command(name = "dst-controller", about = "Event scheduler and fault-injection controller")]
struct Args {
    /// Address to bind the control-plane listener on.
    #[arg(short = 's', long = "addr", default_value = "127.0.0.1:10000")]
    addr: String,

    /// Seconds to wait for a process's ack before a local injection times out.
    #[arg(long = "timeout", default_value_t = 5.0)]
    timeout_secs: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = ControllerConfig::load().unwrap_or_default();
    config.bind_addr = args.addr.clone();

    let mut controller = Controller::bind(config).await?;
    tracing::info!(addr = %args.addr, "controller listening");

    let timeout = Duration::from_secs_f64(args.timeout_secs);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => inject_local_message(&mut controller, &line, timeout).await,
                    None => {
                        tracing::info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Parses a `<recipient> <type> [body]` line and injects it as a local
/// message; malformed lines are logged and ignored rather than crashing
/// the REPL.
async fn inject_local_message(controller: &mut Controller, line: &str, timeout: Duration) {
    let mut parts = line.splitn(3, ' ');
    let (Some(recipient), Some(kind)) = (parts.next(), parts.next()) else {
        tracing::warn!(%line, "expected '<recipient> <type> [body]'");
        return;
    };
    let body = parts.next();

    let mut envelope = Envelope::new(kind).with_sender(dst_wire::LOCAL);
    if let Some(body) = body {
        envelope = envelope.with_body(serde_json::Value::String(body.to_string()));
    }

    match controller.send_local_message(recipient, envelope.encode(), timeout).await {
        Ok(result) => tracing::info!(%recipient, %kind, ?result, "injected local message"),
        Err(err) => tracing::error!(%recipient, %kind, %err, "failed to inject local message"),
    }
}

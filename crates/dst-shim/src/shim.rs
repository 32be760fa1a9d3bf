//! The shim's control-plane loop.
//!
//! One task owns the connection to the controller and serializes every
//! user-callback invocation behind it — `DeliverMessage`/`FireTimer`
//! commands are processed one at a time, and a command is not
//! acknowledged until `Process::receive`/`Process::on_timer` returns.
//! It's a message-driven state machine whose single state is waiting
//! for the next controller command: a single task, a single
//! connection, no concurrent callback invocations.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use dst_wire::{Command, Envelope, LOCAL, ShimEvent, encode_frame, try_decode_frame};

use crate::error::ShimError;
use crate::process::{Context, Message, Mode, Outbound, Process};

/// Runs `process` under the shim until the controller closes the
/// connection or the process receives `SIGINT`/`SIGTERM`.
///
/// Reads `TEST_SERVER` (controller `host:port`) and `TEST_MODE`
/// (`CONTROL`, the default, or `WATCH`) from the environment. If
/// `TEST_SERVER` is unset, the process runs standalone — this crate's
/// shim only exists to mediate test runs, so standalone mode is a
/// no-op rather than a real unmediated network stack.
pub async fn run<P: Process>(name: impl Into<String>, process: P) -> Result<(), ShimError> {
    let name = name.into();

    let Ok(server_addr) = std::env::var("TEST_SERVER") else {
        tracing::info!(process = %name, "TEST_SERVER unset; running standalone, no shim interception");
        return Ok(());
    };
    let mode = match std::env::var("TEST_MODE").as_deref() {
        Ok("WATCH") => Mode::Watch,
        _ => Mode::Control,
    };

    run_connected(name, process, server_addr, mode).await
}

/// As [`run`], but with the controller address and mode passed
/// explicitly instead of read from the environment. `run` is a thin
/// wrapper around this for the common case; integration tests that
/// drive several processes in one test binary use this directly so
/// they don't race each other over process-wide environment variables.
pub async fn run_connected<P: Process>(
    name: impl Into<String>,
    process: P,
    server_addr: impl Into<String>,
    mode: Mode,
) -> Result<(), ShimError> {
    let name = name.into();
    let server_addr = server_addr.into();

    // The shim owns a real UDP socket even in CONTROL mode, so
    // user-level address lookups work uniformly across modes.
    let udp = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = udp.local_addr()?.to_string();
    let udp = Arc::new(udp);

    let stream = TcpStream::connect(&server_addr).await?;
    let (mut read_half, write_half) = stream.into_split();
    let write_half = Arc::new(Mutex::new(write_half));

    send_frame(&write_half, &ShimEvent::ProcessStarted { id: name.clone(), addr: addr.clone() }).await?;

    let (fire_tx, mut fire_rx) = mpsc::unbounded_channel::<(String, String)>();

    let ctx = Context::<P::Payload>::new(name.clone(), addr.clone(), mode);
    let mut worker = Worker {
        name: name.clone(),
        mode,
        process,
        ctx,
        udp,
        write_half: write_half.clone(),
        watch_timers: HashMap::new(),
        fire_tx,
    };

    let mut read_buf = BytesMut::with_capacity(4096);
    let result = loop {
        tokio::select! {
            biased;

            _ = shutdown_signal() => {
                tracing::info!(process = %name, "received shutdown signal");
                break Ok(());
            }

            Some((id, timer_name)) = fire_rx.recv(), if mode == Mode::Watch => {
                worker.handle_timer(&id, &timer_name, true).await?;
            }

            frame = read_command(&mut read_half, &mut read_buf) => {
                match frame {
                    Ok(Some(Command::ReceiveLocalMessage { id, raw })) => {
                        worker.handle_deliver(&id, LOCAL, &raw).await?;
                    }
                    Ok(Some(Command::ReceiveMessage { id, sender_addr, raw })) => {
                        worker.handle_deliver(&id, &sender_addr, &raw).await?;
                    }
                    Ok(Some(Command::FireTimer { id, name: timer_name })) => {
                        worker.handle_timer(&id, &timer_name, false).await?;
                    }
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(err),
                }
            }
        }
    };

    let _ = send_frame(&write_half, &ShimEvent::ProcessStopped { id: name.clone() }).await;
    for handle in worker.watch_timers.into_values() {
        handle.abort();
    }
    result
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

struct Worker<P: Process> {
    name: String,
    mode: Mode,
    process: P,
    ctx: Context<P::Payload>,
    udp: Arc<UdpSocket>,
    write_half: Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    /// WATCH-mode-only: real background timer tasks, keyed by timer id,
    /// so a `set_timer` replacing a name's prior timer (or a
    /// `cancel_timer`) can abort the stale one.
    watch_timers: HashMap<String, JoinHandle<()>>,
    /// WATCH-mode-only: how a real timer task reports back that it fired.
    fire_tx: mpsc::UnboundedSender<(String, String)>,
}

impl<P: Process> Worker<P> {
    async fn handle_deliver(&mut self, id: &str, sender_addr: &str, raw: &[u8]) -> Result<(), ShimError> {
        let envelope = Envelope::decode(raw);
        let msg = match envelope {
            Ok(envelope) => Message {
                kind: envelope.kind,
                sender: sender_addr.to_string(),
                id: id.to_string(),
                payload: envelope
                    .body
                    .and_then(|body| serde_json::from_value(body).ok()),
            },
            Err(err) => {
                tracing::warn!(id, %err, "malformed inbound envelope; delivering with no payload");
                Message { kind: String::new(), sender: sender_addr.to_string(), id: id.to_string(), payload: None }
            }
        };

        let process = &mut self.process;
        let ctx = &mut self.ctx;
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| process.receive(ctx, msg))) {
            tracing::error!(id, process = %self.name, ?panic, "user callback panicked; acking anyway");
        }

        self.drain_outbox().await?;
        send_frame(&self.write_half, &ShimEvent::MessageProcessed { id: id.to_string() }).await
    }

    async fn handle_timer(&mut self, id: &str, timer_name: &str, observed: bool) -> Result<(), ShimError> {
        if observed {
            send_frame(&self.write_half, &ShimEvent::TimerFired { id: id.to_string() }).await?;
        }

        let process = &mut self.process;
        let ctx = &mut self.ctx;
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| process.on_timer(ctx, timer_name))) {
            tracing::error!(id, process = %self.name, ?panic, "user timer callback panicked; acking anyway");
        }

        self.drain_outbox().await?;
        send_frame(&self.write_half, &ShimEvent::TimerProcessed { id: id.to_string() }).await
    }

    /// Announces every action the just-finished callback queued, and —
    /// in WATCH mode only — performs the matching real side effect
    /// (send a UDP datagram, schedule a real timer task).
    async fn drain_outbox(&mut self) -> Result<(), ShimError> {
        let outbox = std::mem::take(&mut self.ctx.outbox);
        for action in outbox {
            match action {
                Outbound::Message { id, recipient_addr, raw } => {
                    if self.mode == Mode::Watch && recipient_addr != LOCAL {
                        if let Err(err) = self.udp.send_to(&raw, &recipient_addr).await {
                            tracing::debug!(%recipient_addr, %err, "watch-mode real send failed");
                        }
                    }
                    send_frame(&self.write_half, &ShimEvent::NewMessage { id, recipient_addr, raw }).await?;
                }
                Outbound::NewTimer { id, name, interval, replaced } => {
                    if let Some(old_id) = replaced {
                        if let Some(handle) = self.watch_timers.remove(&old_id) {
                            handle.abort();
                        }
                    }
                    if self.mode == Mode::Watch {
                        let tx = self.fire_tx.clone();
                        let fire_id = id.clone();
                        let fire_name = name.clone();
                        let handle = tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_secs_f64(interval)).await;
                            let _ = tx.send((fire_id, fire_name));
                        });
                        self.watch_timers.insert(id.clone(), handle);
                    }
                    send_frame(&self.write_half, &ShimEvent::NewTimer { id, name, interval }).await?;
                }
                Outbound::TimerCanceled { id } => {
                    if let Some(handle) = self.watch_timers.remove(&id) {
                        handle.abort();
                    }
                    send_frame(&self.write_half, &ShimEvent::TimerCanceled { id }).await?;
                }
            }
        }
        Ok(())
    }
}

async fn send_frame(write_half: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>, event: &ShimEvent) -> Result<(), ShimError> {
    let mut buf = BytesMut::new();
    encode_frame(event, &mut buf)?;
    let mut guard = write_half.lock().await;
    guard.write_all(&buf).await?;
    Ok(())
}

async fn read_command(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    buf: &mut BytesMut,
) -> Result<Option<Command>, ShimError> {
    loop {
        if let Some(cmd) = try_decode_frame::<Command>(buf)? {
            return Ok(Some(cmd));
        }
        let mut chunk = [0u8; 4096];
        let n = read_half.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

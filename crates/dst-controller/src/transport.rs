//! Control-plane transport: accepts one `TcpStream` per process,
//! framing `ShimEvent`s and `Command`s with
//! [`dst_wire::encode_frame`]/[`dst_wire::try_decode_frame`].
//!
//! One task per connection reads incoming frames and forwards them to
//! the controller's single event-processing loop; a paired task owns
//! the write half and drains an `UnboundedSender<Command>` handed to
//! the connection's eventual process descriptor — one task, one
//! connection, no concurrent writers per process.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};

use dst_wire::{Command, ShimEvent, try_decode_frame};

use crate::error::ControllerError;

/// A connection identifier, assigned before the connecting process has
/// announced its `ProcessStarted` handshake and thus before the
/// controller knows its logical name.
pub type ConnId = u64;

/// Shared registry of not-yet-attributed command senders. The accept
/// loop populates this as connections arrive; the controller's event
/// loop drains it into a `ProcessDescriptor` once a `ProcessStarted`
/// announcement names the connection.
pub type PendingCommandTxs = Arc<Mutex<HashMap<ConnId, mpsc::UnboundedSender<Command>>>>;

/// Runs the accept loop until the listener is closed or an I/O error
/// occurs. Every accepted connection is handed its own reader/writer
/// task pair and a fresh [`ConnId`].
pub async fn accept_loop(
    listener: TcpListener,
    inbound_tx: mpsc::UnboundedSender<(ConnId, ShimEvent)>,
    pending: PendingCommandTxs,
) -> Result<(), ControllerError> {
    let next_id = Arc::new(AtomicU64::new(0));
    loop {
        let (stream, _peer) = listener.accept().await?;
        let conn_id = next_id.fetch_add(1, Ordering::Relaxed);
        let inbound_tx = inbound_tx.clone();
        let pending = pending.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(conn_id, stream, inbound_tx, pending).await {
                tracing::debug!(conn_id, %err, "control-plane connection closed");
            }
        });
    }
}

async fn handle_connection(
    conn_id: ConnId,
    stream: TcpStream,
    inbound_tx: mpsc::UnboundedSender<(ConnId, ShimEvent)>,
    pending: PendingCommandTxs,
) -> Result<(), ControllerError> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Command>();
    pending.lock().await.insert(conn_id, command_tx);

    let writer = tokio::spawn(async move {
        let mut buf = BytesMut::new();
        while let Some(cmd) = command_rx.recv().await {
            buf.clear();
            if dst_wire::encode_frame(&cmd, &mut buf).is_err() {
                continue;
            }
            if write_half.write_all(&buf).await.is_err() {
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(4096);
    let result = loop {
        match try_decode_frame::<ShimEvent>(&mut buf) {
            Ok(Some(event)) => {
                if inbound_tx.send((conn_id, event)).is_err() {
                    break Ok(());
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => break Err(ControllerError::from(err)),
        }

        let mut chunk = [0u8; 4096];
        let n = read_half.read(&mut chunk).await?;
        if n == 0 {
            break Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    writer.abort();
    result
}

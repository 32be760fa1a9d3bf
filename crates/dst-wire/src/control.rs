//! Control-plane messages exchanged between a process shim and the
//! controller.
//!
//! `ShimEvent` travels process → controller (announcements); `Command`
//! travels controller → process (instructions). Keeping them as two
//! distinct tagged enums — rather than one combined envelope — reflects
//! that each direction of the stream only ever carries one of the two.

use serde::{Deserialize, Serialize};

/// Announcement sent by a process shim to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ShimEvent {
    /// Sent once on startup; `addr` is the `host:port` the shim is
    /// reachable at for incoming messages.
    ProcessStarted { id: String, addr: String },
    /// Sent on clean shutdown (signal handling in `dst-shim`).
    ProcessStopped { id: String },
    /// The process's user code called `Context::send` or `send_local`.
    NewMessage {
        id: String,
        recipient_addr: String,
        raw: Vec<u8>,
    },
    /// WATCH-mode-only: the shim observed this message arrive over a real
    /// socket, before the user callback has run. Not produced in CONTROL
    /// mode (no real I/O happens there) and not waited on by the scheduler.
    MessageReceived { id: String, raw: Option<Vec<u8>> },
    /// Acknowledges that a delivered message finished running through the
    /// user's `Process::receive` callback. This is the ack the scheduler's
    /// `step` blocks on.
    MessageProcessed { id: String },
    /// The process's user code called `Context::set_timer`.
    NewTimer {
        id: String,
        name: String,
        interval: f64,
    },
    /// The process's user code called `Context::cancel_timer`.
    TimerCanceled { id: String },
    /// WATCH-mode-only: the shim's real timer fired, before `on_timer` has
    /// run. Not produced in CONTROL mode.
    TimerFired { id: String },
    /// Acknowledges that a fired timer finished running through the
    /// user's `Process::on_timer` callback. This is the ack the scheduler's
    /// `step` blocks on.
    TimerProcessed { id: String },
}

/// Instruction sent by the controller to a process shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Deliver a locally injected (operator) message to the process.
    ReceiveLocalMessage { id: String, raw: Vec<u8> },
    /// Deliver a message that arrived from another process.
    ReceiveMessage {
        id: String,
        sender_addr: String,
        raw: Vec<u8>,
    },
    /// Invoke the named timer's callback.
    FireTimer { id: String, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shim_event_round_trips_through_json() {
        let ev = ShimEvent::NewTimer {
            id: "p1-t3".to_string(),
            name: "retry".to_string(),
            interval: 0.5,
        };
        let raw = serde_json::to_vec(&ev).unwrap();
        let decoded: ShimEvent = serde_json::from_slice(&raw).unwrap();
        assert_eq!(decoded, ev);
    }

    #[test]
    fn command_round_trips_through_json() {
        let cmd = Command::ReceiveMessage {
            id: "p1-m4".to_string(),
            sender_addr: "127.0.0.1:10001".to_string(),
            raw: b"hello".to_vec(),
        };
        let raw = serde_json::to_vec(&cmd).unwrap();
        let decoded: Command = serde_json::from_slice(&raw).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn variants_are_distinguished_by_tag() {
        let raw = serde_json::to_vec(&ShimEvent::ProcessStopped {
            id: "p1".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["event"], "process_stopped");
    }
}

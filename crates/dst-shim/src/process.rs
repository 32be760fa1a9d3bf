//! The user-facing programming interface: the `Process` trait user code
//! implements, and the `Context` the shim hands it on every callback.
//!
//! Four operations (`send`, `send_local`, `set_timer`, `cancel_timer`)
//! and two callbacks (`receive`, `on_timer`), rendered as a trait plus
//! an associated payload type rather than a duck-typed base class — a
//! per-process payload type is the idiomatic Rust rendering of
//! arbitrary user-message bodies.

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use dst_wire::{Envelope, LOCAL};

/// A user process. `Payload` is whatever that process's messages carry
/// in their envelope body — opaque to the controller and to `dst-shim`,
/// meaningful only to this implementation and its peers.
pub trait Process: Send {
    type Payload: Serialize + DeserializeOwned + Send + 'static;

    /// Invoked exactly once per `ReceiveMessage`/`ReceiveLocalMessage`
    /// command; must return before the shim emits the corresponding ack.
    fn receive(&mut self, ctx: &mut Context<Self::Payload>, msg: Message<Self::Payload>);

    /// Invoked exactly once per `FireTimer` command; same ack discipline.
    fn on_timer(&mut self, ctx: &mut Context<Self::Payload>, name: &str);
}

/// An inbound message, decoded from the wire envelope.
#[derive(Debug, Clone)]
pub struct Message<P> {
    pub kind: String,
    /// The real `host:port` of the sender, or the sentinel
    /// [`dst_wire::LOCAL`] for operator-injected messages.
    pub sender: String,
    pub id: String,
    /// `None` if the envelope carried no body, or a body this process's
    /// `Payload` type failed to decode (logged, not treated as fatal —
    /// the callback still runs so it can react to malformed input).
    pub payload: Option<P>,
}

/// Actions queued by a `Context` during a callback, drained by the
/// shim once the callback returns: everything the user code does
/// during one callback is observed by the controller before the
/// controller sees that callback's completion ack.
#[derive(Debug)]
pub(crate) enum Outbound {
    Message {
        id: String,
        recipient_addr: String,
        raw: Vec<u8>,
    },
    NewTimer {
        id: String,
        name: String,
        interval: f64,
        /// The timer id this one replaces, if `set_timer` was called
        /// again for a name that already had a pending timer — the
        /// shim's WATCH-mode real-timer task for the old id must be
        /// aborted so the two don't race.
        replaced: Option<String>,
    },
    TimerCanceled {
        id: String,
    },
}

/// What the shim does with a process's announcements and real timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// All I/O suppressed; user code runs only in response to
    /// controller commands. Timers never fire unless commanded.
    Control,
    /// The process additionally performs real network I/O and real
    /// timers; the controller only observes.
    Watch,
}

/// Handed to `Process::receive`/`Process::on_timer` on every callback.
/// Exposes `send`, `send_local`, `set_timer`, `cancel_timer`, `addr` —
/// the only way user code can act on the outside world.
pub struct Context<P> {
    name: String,
    addr: String,
    mode: Mode,
    next_message_seq: u64,
    next_timer_seq: u64,
    pending_timers: HashMap<String, String>,
    pub(crate) outbox: Vec<Outbound>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Serialize> Context<P> {
    pub(crate) fn new(name: String, addr: String, mode: Mode) -> Self {
        Self {
            name,
            addr,
            mode,
            next_message_seq: 0,
            next_timer_seq: 0,
            pending_timers: HashMap::new(),
            outbox: Vec::new(),
            _payload: PhantomData,
        }
    }

    /// This process's bound `host:port`.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn next_message_id(&mut self) -> String {
        let id = format!("{}-m{}", self.name, self.next_message_seq);
        self.next_message_seq += 1;
        id
    }

    fn next_timer_id(&mut self) -> String {
        let id = format!("{}-t{}", self.name, self.next_timer_seq);
        self.next_timer_seq += 1;
        id
    }

    /// Enqueues `body` (tagged `kind`) for delivery to `recipient_addr`.
    /// Returns immediately; in test mode this only announces a new
    /// message to the controller and never transmits over the network
    /// directly.
    pub fn send(&mut self, kind: &str, body: &P, recipient_addr: &str) {
        let id = self.next_message_id();
        let envelope = Envelope::new(kind)
            .with_body(serde_json::to_value(body).expect("payload serializes"))
            .with_sender(self.addr.clone())
            .with_id(id.clone());
        self.outbox.push(Outbound::Message {
            id,
            recipient_addr: recipient_addr.to_string(),
            raw: envelope.encode(),
        });
    }

    /// Emits an externally observable message. Announced to the
    /// controller, which records it in this process's local-message
    /// queue rather than routing it to any recipient.
    pub fn send_local(&mut self, kind: &str, body: &P) {
        let id = self.next_message_id();
        let envelope = Envelope::new(kind)
            .with_body(serde_json::to_value(body).expect("payload serializes"))
            .with_sender(LOCAL)
            .with_id(id.clone());
        self.outbox.push(Outbound::Message {
            id,
            recipient_addr: LOCAL.to_string(),
            raw: envelope.encode(),
        });
    }

    /// Creates or replaces the named timer. Announces the real
    /// `interval` the caller asked for — the 1.0-virtual-second
    /// coercion in CONTROL mode is the controller's doing, not the
    /// shim's.
    pub fn set_timer(&mut self, name: &str, interval: f64) {
        let id = self.next_timer_id();
        let replaced = self.pending_timers.insert(name.to_string(), id.clone());
        self.outbox.push(Outbound::NewTimer {
            id,
            name: name.to_string(),
            interval,
            replaced,
        });
    }

    /// Removes a pending timer, if one is set under `name`.
    pub fn cancel_timer(&mut self, name: &str) {
        if let Some(id) = self.pending_timers.remove(name) {
            self.outbox.push(Outbound::TimerCanceled { id });
        }
    }
}

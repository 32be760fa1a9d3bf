//! The scheduler and test-driver surface.
//!
//! `Controller` owns every piece of authoritative state a test run
//! needs: virtual time, the pending [`EventStore`], the
//! [`ProcessRegistry`], the [`NetworkTopology`], and the
//! [`FaultPolicy`] — all mutated only from here, never from
//! module-level singletons. Connected shims talk to it over the
//! control-plane stream set up in [`crate::transport`]; test code talks
//! to it by calling the `async fn`s below directly.

use std::collections::HashMap;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use dst_wire::{Command, ShimEvent};

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::event::{EventId, EventKind, EventStore};
use crate::fault::FaultPolicy;
use crate::process::{LivenessState, ProcessDescriptor, ProcessRegistry};
use crate::rng::SimRng;
use crate::topology::NetworkTopology;
use crate::transport::{ConnId, PendingCommandTxs, accept_loop};
use crate::VirtualClock;

/// Outcome of one [`Controller::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// One event was selected, fault-injected (possibly discarded), and
    /// — if delivered — acknowledged.
    Progressed,
    /// The event store was empty; nothing to do.
    Idle,
    /// An event was dispatched but its ack did not arrive before the
    /// step timeout. The event remains in the store.
    TimedOut,
}

/// The controller's authoritative state for one test run.
pub struct Controller {
    config: ControllerConfig,
    clock: VirtualClock,
    events: EventStore,
    processes: ProcessRegistry,
    topology: NetworkTopology,
    fault: FaultPolicy,
    rng: SimRng,
    inbound_rx: mpsc::UnboundedReceiver<(ConnId, ShimEvent)>,
    pending_command_txs: PendingCommandTxs,
    conn_to_name: HashMap<ConnId, String>,
    /// Set right before a `ReceiveMessage`/`FireTimer` command is sent,
    /// cleared once its ack arrives. While set, `step` resumes waiting on
    /// this id instead of re-selecting and re-sending the command, so a
    /// slow ack doesn't get redelivered on the next call.
    awaiting_ack: Option<EventId>,
}

impl Controller {
    /// Binds a `TcpListener` on `config.bind_addr`, spawns the
    /// control-plane accept loop (`crate::transport::accept_loop`), and
    /// returns a `Controller` ready to drive test code against it.
    pub async fn bind(config: ControllerConfig) -> Result<Self, ControllerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        Self::from_listener(config, listener)
    }

    /// As [`Controller::bind`], but for a listener the caller already
    /// owns (tests bind to `127.0.0.1:0` to get an ephemeral port, then
    /// read it back before handing the listener here).
    pub fn from_listener(config: ControllerConfig, listener: TcpListener) -> Result<Self, ControllerError> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pending_command_txs: PendingCommandTxs = Default::default();
        let pending_for_task = pending_command_txs.clone();
        tokio::spawn(async move {
            if let Err(err) = accept_loop(listener, inbound_tx, pending_for_task).await {
                tracing::debug!(%err, "control-plane accept loop ended");
            }
        });

        let rng = SimRng::from_seed(config.seed);
        Ok(Self {
            config,
            clock: VirtualClock::new(),
            events: EventStore::new(),
            processes: ProcessRegistry::new(),
            topology: NetworkTopology::new(),
            fault: FaultPolicy::default(),
            rng,
            inbound_rx,
            pending_command_txs,
            conn_to_name: HashMap::new(),
            awaiting_ack: None,
        })
    }

    fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.ack_timeout_secs.max(0.0))
    }

    // ---- test-driver surface: observation & topology ----------------

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn get_process_addr(&self, name: &str) -> Result<String, ControllerError> {
        self.processes
            .get(name)
            .map(|p| p.addr.clone())
            .ok_or_else(|| ControllerError::UnknownProcess(name.to_string()))
    }

    /// Blocks, draining `ProcessStarted` handshakes, until `n` processes
    /// have joined or `timeout` elapses.
    pub async fn wait_processes(&mut self, n: usize, timeout: Duration) -> Result<usize, ControllerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.processes.len() < n {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.inbound_rx.recv()).await {
                Ok(Some((conn_id, event))) => self.handle_shim_event(conn_id, event).await?,
                Ok(None) => return Err(ControllerError::ChannelClosed),
                Err(_) => break,
            }
        }
        Ok(self.processes.len())
    }

    /// Pops and returns the oldest local-message emission for `process`,
    /// if any is already queued. Does not step the scheduler.
    pub fn take_local_message(&mut self, process: &str) -> Option<Vec<u8>> {
        self.processes.get_mut(process).and_then(|p| p.local_messages.pop_front())
    }

    pub fn local_message_count(&self, process: &str) -> usize {
        self.processes.get(process).map_or(0, |p| p.local_messages.len())
    }

    /// Blocks until `process` has at least one queued local message or
    /// `timeout` elapses, without itself calling `step` — the caller is
    /// expected to be stepping concurrently (or to have already stepped
    /// enough for the message to exist).
    pub async fn wait_local_message(&mut self, process: &str, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(raw) = self.take_local_message(process) {
                return Some(raw);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.inbound_rx.recv()).await {
                Ok(Some((conn_id, event))) => {
                    if self.handle_shim_event(conn_id, event).await.is_err() {
                        return None;
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    // ---- fault knobs ---------------------------------------------------

    pub fn set_message_delay(&mut self, min_delay: f64, max_delay: f64) {
        self.fault.min_delay = min_delay;
        self.fault.max_delay = max_delay;
    }

    pub fn set_message_drop_rate(&mut self, drop_rate: f64) {
        self.fault.drop_rate = drop_rate;
    }

    pub fn set_repeat_rate(&mut self, repeat_rate: f64, repeat_times: u32) {
        self.fault.repeat_rate = repeat_rate;
        self.fault.repeat_times = repeat_times;
    }

    pub fn set_event_reordering(&mut self, enabled: bool) {
        self.fault.event_reordering = enabled;
        if enabled {
            self.fault.real_time_mode = false;
        }
    }

    pub fn set_real_time_mode(&mut self, enabled: bool) {
        self.fault.real_time_mode = enabled;
    }

    // ---- topology operations ------------------------------------------

    /// Marks `process` crashed and purges every event with it as
    /// sender, recipient, or timer owner.
    pub fn crash_process(&mut self, process: &str) {
        if let Some(p) = self.processes.get_mut(process) {
            p.liveness = LivenessState::Crashed;
        }
        let name = process.to_string();
        let purged = self.events.remove_by(|e| match &e.kind {
            EventKind::Message { sender, recipient, .. } => *sender == name || *recipient == name,
            EventKind::Timer { owner, .. } => *owner == name,
        });
        tracing::info!(process = %name, purged = purged.len(), "crashed process");
        if let Some(p) = self.processes.get_mut(process) {
            p.pending_timers.clear();
        }
    }

    pub fn disconnect_process(&mut self, process: &str) {
        self.topology.drop_incoming(process);
        tracing::info!(process, "disconnected");
    }

    pub fn connect_process(&mut self, process: &str) {
        self.topology.allow_incoming(process);
        tracing::info!(process, "reconnected");
    }

    pub fn drop_incoming(&mut self, process: &str) {
        self.topology.drop_incoming(process);
    }

    pub fn disable_link(&mut self, src: &str, dst: &str) {
        self.topology.disable_link(src, dst);
    }

    pub fn enable_link(&mut self, src: &str, dst: &str) {
        self.topology.enable_link(src, dst);
    }

    pub fn partition_network(&mut self, group_a: &[String], group_b: &[String]) {
        self.topology.partition(group_a, group_b);
        tracing::info!(?group_a, ?group_b, "network partitioned");
    }

    pub fn reset_network(&mut self) {
        self.topology.reset();
        tracing::info!("network topology reset");
    }

    // ---- scheduler: step / steps / step_until_* -----------------------

    /// One dispatch cycle. Drains any shim announcements
    /// that arrived since the last call, assigns delays to freshly
    /// announced messages, selects the next event per the current fault
    /// policy, fault-injects, and — if the event survives — dispatches it
    /// and blocks for the owning process's ack.
    pub async fn step(&mut self, timeout: Duration) -> Result<StepResult, ControllerError> {
        self.drain_inbound().await?;

        if let Some(id) = self.awaiting_ack.clone() {
            if self.events.contains(&id) {
                // A previous step's ack wait timed out before the command
                // it already sent was acknowledged. Resume waiting on the
                // same id rather than re-selecting and re-sending
                // `ReceiveMessage`/`FireTimer`, which would let the
                // recipient process the same event twice.
                return self.wait_for_ack(&id, timeout).await;
            }
            // Acked (or purged) while draining inbound above.
            self.awaiting_ack = None;
        }

        if self.events.is_empty() {
            return Ok(StepResult::Idle);
        }

        let fault = self.fault.clone();
        let mut rng = self.rng.clone();
        self.events
            .assign_pending_delays(|sender, recipient| fault.sample_delay(sender, recipient, &mut rng));
        self.rng = rng;

        let selected = if self.fault.event_reordering {
            self.events.random_pick(&mut self.rng)
        } else {
            self.events.argmin_scheduled()
        };
        let Some(id) = selected else {
            return Ok(StepResult::Idle);
        };

        let event = self.events.get(&id).expect("just selected").clone();

        if self.fault.real_time_mode {
            if let Some(scheduled_at) = event.scheduled_at {
                let delta = scheduled_at - self.clock.now();
                if delta > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(delta)).await;
                }
            }
        }

        if let Some(scheduled_at) = event.scheduled_at {
            if scheduled_at > self.clock.now() {
                self.clock.advance_to(scheduled_at);
            }
        }

        match &event.kind {
            EventKind::Message { sender, recipient, payload } => {
                self.dispatch_message(&event.id, sender, recipient, payload, timeout).await
            }
            EventKind::Timer { owner, name } => self.dispatch_timer(&event.id, owner, name, timeout).await,
        }
    }

    async fn dispatch_message(
        &mut self,
        id: &str,
        sender: &str,
        recipient: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<StepResult, ControllerError> {
        let recipient_crashed = self
            .processes
            .get(recipient)
            .is_none_or(|p| p.liveness == LivenessState::Crashed);
        if recipient_crashed {
            self.events.remove(id);
            tracing::debug!(id, recipient, "discarded: recipient crashed");
            return Ok(StepResult::Progressed);
        }

        if self.topology.is_denied(sender, recipient) {
            self.events.remove(id);
            tracing::debug!(id, sender, recipient, "discarded: denied by topology");
            return Ok(StepResult::Progressed);
        }

        if self.rng.next_bool_with_probability(self.fault.drop_rate) {
            self.events.remove(id);
            tracing::debug!(id, "discarded: random drop");
            return Ok(StepResult::Progressed);
        }

        let repeatable = self.events.get(id).is_some_and(|e| e.repeatable);
        if repeatable && self.rng.next_bool_with_probability(self.fault.repeat_rate) {
            let created_at = self.events.get(id).map(|e| e.created_at).unwrap_or(self.clock.now());
            for dup_id in duplicate_ids(id, self.fault.repeat_times) {
                self.events.insert(
                    dup_id,
                    EventKind::Message {
                        sender: sender.to_string(),
                        recipient: recipient.to_string(),
                        payload: payload.to_vec(),
                    },
                    created_at,
                    None,
                    false,
                );
            }
            tracing::debug!(id, times = self.fault.repeat_times, "duplicated message");
        }

        let Some(descriptor) = self.processes.get(recipient) else {
            self.events.remove(id);
            return Ok(StepResult::Progressed);
        };
        let sender_addr = self.processes.get(sender).map_or_else(|| sender.to_string(), |p| p.addr.clone());
        let cmd = Command::ReceiveMessage {
            id: id.to_string(),
            sender_addr,
            raw: payload.to_vec(),
        };
        if descriptor.command_tx.send(cmd).is_err() {
            self.events.remove(id);
            return Ok(StepResult::Progressed);
        }

        self.awaiting_ack = Some(id.to_string());
        self.wait_for_ack(id, timeout).await
    }

    async fn dispatch_timer(
        &mut self,
        id: &str,
        owner: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<StepResult, ControllerError> {
        let Some(descriptor) = self.processes.get(owner) else {
            self.events.remove(id);
            return Ok(StepResult::Progressed);
        };
        if descriptor.liveness == LivenessState::Crashed {
            self.events.remove(id);
            return Ok(StepResult::Progressed);
        }
        let cmd = Command::FireTimer {
            id: id.to_string(),
            name: name.to_string(),
        };
        if descriptor.command_tx.send(cmd).is_err() {
            self.events.remove(id);
            return Ok(StepResult::Progressed);
        }

        self.awaiting_ack = Some(id.to_string());
        self.wait_for_ack(id, timeout).await
    }

    /// Awaits the `MessageProcessed`/`TimerProcessed` ack for `id`,
    /// processing any other shim announcements that arrive in the
    /// meantime — outbound actions the triggering callback performed are
    /// recorded before the controller observes the ack.
    async fn wait_for_ack(&mut self, id: &str, timeout: Duration) -> Result<StepResult, ControllerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(StepResult::TimedOut);
            }
            match tokio::time::timeout(remaining, self.inbound_rx.recv()).await {
                Ok(Some((conn_id, event))) => {
                    let acked = match &event {
                        ShimEvent::MessageProcessed { id: acked_id } | ShimEvent::TimerProcessed { id: acked_id } => {
                            acked_id == id
                        }
                        _ => false,
                    };
                    self.handle_shim_event(conn_id, event).await?;
                    if acked {
                        self.awaiting_ack = None;
                        return Ok(StepResult::Progressed);
                    }
                }
                Ok(None) => {
                    self.awaiting_ack = None;
                    return Err(ControllerError::ChannelClosed);
                }
                Err(_) => return Ok(StepResult::TimedOut),
            }
        }
    }

    /// Calls `step` up to `n` times, stopping early on `Idle`.
    pub async fn steps(&mut self, n: usize, timeout: Duration) -> Result<StepResult, ControllerError> {
        let mut last = StepResult::Idle;
        for _ in 0..n {
            last = self.step(timeout).await?;
            if last == StepResult::Idle {
                break;
            }
        }
        Ok(last)
    }

    /// Loops `step` until `process` has a queued local message, or
    /// `timeout` (wall-clock, across the whole loop) elapses.
    pub async fn step_until_local_message(
        &mut self,
        process: &str,
        timeout: Duration,
    ) -> Result<StepResult, ControllerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.local_message_count(process) > 0 {
                return Ok(StepResult::Progressed);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(StepResult::TimedOut);
            }
            match self.step(remaining).await? {
                StepResult::Idle => return Ok(StepResult::Idle),
                StepResult::TimedOut => return Ok(StepResult::TimedOut),
                StepResult::Progressed => continue,
            }
        }
    }

    /// Loops `step` until the event store is empty, or `timeout` elapses.
    pub async fn step_until_no_events(&mut self, timeout: Duration) -> Result<StepResult, ControllerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.events.is_empty() {
                return Ok(StepResult::Idle);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(StepResult::TimedOut);
            }
            match self.step(remaining).await? {
                StepResult::Idle => return Ok(StepResult::Idle),
                StepResult::TimedOut => return Ok(StepResult::TimedOut),
                StepResult::Progressed => continue,
            }
        }
    }

    // ---- local message injection --------------------------------------

    /// Injects `raw` into `process` as if its operator had typed it.
    /// Bypasses the event store entirely — this is a direct command,
    /// acked the same way a dispatched event is, using the synthetic id
    /// `"local"`.
    pub async fn send_local_message(
        &mut self,
        process: &str,
        raw: Vec<u8>,
        timeout: Duration,
    ) -> Result<StepResult, ControllerError> {
        let Some(descriptor) = self.processes.get(process) else {
            return Err(ControllerError::UnknownProcess(process.to_string()));
        };
        let cmd = Command::ReceiveLocalMessage {
            id: "local".to_string(),
            raw,
        };
        if descriptor.command_tx.send(cmd).is_err() {
            return Ok(StepResult::TimedOut);
        }
        self.wait_for_ack("local", timeout).await
    }

    // ---- shim-event ingestion ------------------------------------------

    /// Drains every currently-available `ShimEvent` without blocking.
    async fn drain_inbound(&mut self) -> Result<(), ControllerError> {
        while let Ok((conn_id, event)) = self.inbound_rx.try_recv() {
            self.handle_shim_event(conn_id, event).await?;
        }
        Ok(())
    }

    async fn handle_shim_event(&mut self, conn_id: ConnId, event: ShimEvent) -> Result<(), ControllerError> {
        match event {
            ShimEvent::ProcessStarted { id: name, addr } => self.on_process_started(conn_id, name, addr).await,
            ShimEvent::ProcessStopped { id: name } => {
                if let Some(p) = self.processes.get_mut(&name) {
                    p.liveness = LivenessState::Stopped;
                }
                tracing::info!(process = %name, "process stopped");
            }
            ShimEvent::NewMessage { id, recipient_addr, raw } => self.on_new_message(conn_id, id, recipient_addr, raw),
            ShimEvent::MessageReceived { .. } | ShimEvent::TimerFired { .. } => {
                // WATCH-mode-only observational events; nothing to do in
                // CONTROL mode, since the controller itself triggered
                // the delivery and will receive the matching *Processed ack.
            }
            ShimEvent::MessageProcessed { id } | ShimEvent::TimerProcessed { id } => {
                self.events.remove(&id);
            }
            ShimEvent::NewTimer { id, name, interval } => self.on_new_timer(conn_id, id, name, interval),
            ShimEvent::TimerCanceled { id } => {
                if let Some(event) = self.events.remove(&id) {
                    if let EventKind::Timer { owner, name } = event.kind {
                        if let Some(p) = self.processes.get_mut(&owner) {
                            p.pending_timers.remove(&name);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_process_started(&mut self, conn_id: ConnId, name: String, addr: String) {
        let command_tx = {
            let mut pending = self.pending_command_txs.lock().await;
            pending.remove(&conn_id)
        };
        let Some(command_tx) = command_tx else {
            tracing::warn!(conn_id, %name, "process started without a known connection");
            return;
        };
        self.conn_to_name.insert(conn_id, name.clone());
        self.processes.insert(ProcessDescriptor::new(name.clone(), addr.clone(), command_tx));
        tracing::info!(process = %name, %addr, "process joined");
    }

    fn on_new_message(&mut self, conn_id: ConnId, id: EventId, recipient_addr: String, raw: Vec<u8>) {
        let Some(sender) = self.conn_to_name.get(&conn_id).cloned() else {
            tracing::warn!(conn_id, "message from unregistered connection, discarding");
            return;
        };

        if recipient_addr == dst_wire::LOCAL {
            if let Some(p) = self.processes.get_mut(&sender) {
                p.local_messages.push_back(raw);
            }
            return;
        }

        let Some(recipient) = self.processes.name_for_addr(&recipient_addr).map(str::to_string) else {
            tracing::debug!(%recipient_addr, "discarded: unknown recipient address");
            return;
        };
        self.events.insert(
            id,
            EventKind::Message { sender, recipient, payload: raw },
            self.clock.now(),
            None,
            true,
        );
    }

    fn on_new_timer(&mut self, conn_id: ConnId, id: EventId, name: String, _interval: f64) {
        let Some(owner) = self.conn_to_name.get(&conn_id).cloned() else {
            tracing::warn!(conn_id, "timer from unregistered connection, discarding");
            return;
        };
        // In CONTROL mode every timer interval is coerced to 1.0 virtual
        // second regardless of what the user process requested, so
        // retries stay deterministic across runs.
        const CONTROL_MODE_INTERVAL: f64 = 1.0;

        if let Some(descriptor) = self.processes.get_mut(&owner) {
            if let Some(old_id) = descriptor.pending_timers.remove(&name) {
                self.events.remove(&old_id);
            }
            descriptor.pending_timers.insert(name.clone(), id.clone());
        }
        self.events.insert(
            id,
            EventKind::Timer { owner, name },
            self.clock.now(),
            Some(self.clock.now() + CONTROL_MODE_INTERVAL),
            true,
        );
    }
}

/// Builds the `repeat_times` duplicate ids for a surviving duplication
/// roll on `base_id`, e.g. `"a-m1-dup0"`, `"a-m1-dup1"`, ...
fn duplicate_ids(base_id: &str, repeat_times: u32) -> Vec<EventId> {
    (0..repeat_times).map(|n| format!("{base_id}-dup{n}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest::proptest! {
        #[test]
        fn duplicate_ids_count_matches_repeat_times(
            base_id in "[a-z]{1,10}-m[0-9]{1,3}",
            repeat_times in 0u32..20,
        ) {
            let ids = duplicate_ids(&base_id, repeat_times);
            proptest::prop_assert_eq!(ids.len(), repeat_times as usize);
            proptest::prop_assert!(ids.iter().all(|id| id != &base_id));

            let unique: std::collections::HashSet<_> = ids.iter().collect();
            proptest::prop_assert_eq!(unique.len(), ids.len());
        }
    }
}

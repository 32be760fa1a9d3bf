//! Process descriptors and the registry the controller keeps them in.

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;

use dst_wire::Command;

/// A process's liveness, as tracked by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Running,
    Crashed,
    Stopped,
}

/// Everything the controller knows about one joined process.
pub struct ProcessDescriptor {
    pub name: String,
    pub addr: String,
    pub liveness: LivenessState,
    /// `timer_name -> timer_id` for the single active timer with that
    /// name; re-issuing a name replaces the prior id.
    pub pending_timers: HashMap<String, String>,
    /// FIFO queue of this process's outbound `send_local` emissions,
    /// awaiting observation by the test driver.
    pub local_messages: VecDeque<Vec<u8>>,
    /// The channel the controller uses to push `Command`s down this
    /// process's control-plane stream.
    pub command_tx: mpsc::UnboundedSender<Command>,
    next_message_seq: u64,
    next_timer_seq: u64,
}

impl ProcessDescriptor {
    pub fn new(name: String, addr: String, command_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            name,
            addr,
            liveness: LivenessState::Running,
            pending_timers: HashMap::new(),
            local_messages: VecDeque::new(),
            command_tx,
            next_message_seq: 0,
            next_timer_seq: 0,
        }
    }

    /// The next `<name>-m<N>` id for a message originating from this
    /// process (used only by test-driven local injections; messages the
    /// process itself originates carry an id the shim already assigned).
    pub fn next_message_id(&mut self) -> String {
        let id = format!("{}-m{}", self.name, self.next_message_seq);
        self.next_message_seq += 1;
        id
    }

    pub fn next_timer_id(&mut self) -> String {
        let id = format!("{}-t{}", self.name, self.next_timer_seq);
        self.next_timer_seq += 1;
        id
    }
}

/// Looks processes up by name (the controller's primary key) and by
/// bound address (needed to resolve a `NewMessage`'s `recipient_addr`
/// back to a process name for topology and crash checks).
#[derive(Default)]
pub struct ProcessRegistry {
    by_name: HashMap<String, ProcessDescriptor>,
    addr_to_name: HashMap<String, String>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: ProcessDescriptor) {
        self.addr_to_name
            .insert(descriptor.addr.clone(), descriptor.name.clone());
        self.by_name.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ProcessDescriptor> {
        self.by_name.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ProcessDescriptor> {
        self.by_name.get_mut(name)
    }

    pub fn name_for_addr(&self, addr: &str) -> Option<&str> {
        self.addr_to_name.get(addr).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, addr: &str) -> ProcessDescriptor {
        let (tx, _rx) = mpsc::unbounded_channel();
        ProcessDescriptor::new(name.to_string(), addr.to_string(), tx)
    }

    #[test]
    fn message_and_timer_ids_are_monotone_per_process() {
        let mut p = descriptor("alice", "127.0.0.1:9000");
        assert_eq!(p.next_message_id(), "alice-m0");
        assert_eq!(p.next_message_id(), "alice-m1");
        assert_eq!(p.next_timer_id(), "alice-t0");
        assert_eq!(p.next_timer_id(), "alice-t1");
    }

    #[test]
    fn registry_resolves_addr_to_name() {
        let mut registry = ProcessRegistry::new();
        registry.insert(descriptor("alice", "127.0.0.1:9000"));
        assert_eq!(registry.name_for_addr("127.0.0.1:9000"), Some("alice"));
        assert_eq!(registry.name_for_addr("127.0.0.1:9999"), None);
    }
}

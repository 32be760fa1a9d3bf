//! The event store: the controller's authoritative set of pending
//! events, unifying in-flight messages and pending timers under one
//! `Event` union.

use std::collections::HashMap;

/// Globally unique event id: `<sender>-m<N>` for messages, `<owner>-t<N>`
/// for timers, or the sentinel `"local"`.
pub type EventId = String;

/// What an event will do when dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Message {
        sender: String,
        recipient: String,
        payload: Vec<u8>,
    },
    Timer {
        owner: String,
        name: String,
    },
}

/// One pending event in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
    pub created_at: f64,
    /// Assigned on the event's first scheduling visit (step 2 of the
    /// dispatch algorithm); `None` until then.
    pub scheduled_at: Option<f64>,
    /// Cleared when this event is enqueued as a duplication copy, so a
    /// duplicate can never itself be chosen for further duplication.
    pub repeatable: bool,
    /// Insertion sequence, used only to break scheduled-time ties in
    /// ordered-mode selection (FIFO at equal scheduled time).
    seq: u64,
}

impl Event {
    pub fn is_message(&self) -> bool {
        matches!(self.kind, EventKind::Message { .. })
    }
}

/// An unordered collection of pending events supporting insert,
/// remove-by-id, remove-by-predicate (crash purge), and the scheduler's
/// two selection queries.
#[derive(Debug, Default)]
pub struct EventStore {
    events: HashMap<EventId, Event>,
    next_seq: u64,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn get(&self, id: &str) -> Option<&Event> {
        self.events.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Event> {
        self.events.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.contains_key(id)
    }

    /// Inserts a new event, already-scheduled or not. Returns `false`
    /// without inserting if `id` is already present — ids never
    /// reappear after removal, so a collision is a caller bug.
    pub fn insert(
        &mut self,
        id: EventId,
        kind: EventKind,
        created_at: f64,
        scheduled_at: Option<f64>,
        repeatable: bool,
    ) -> bool {
        if self.events.contains_key(&id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.insert(
            id.clone(),
            Event {
                id,
                kind,
                created_at,
                scheduled_at,
                repeatable,
                seq,
            },
        );
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Event> {
        self.events.remove(id)
    }

    /// Removes every event matching `pred`, returning them. Used for
    /// crash purge (all events with the crashed process as sender,
    /// recipient, or owner) and for pending-timer replacement.
    pub fn remove_by(&mut self, mut pred: impl FnMut(&Event) -> bool) -> Vec<Event> {
        let ids: Vec<EventId> = self
            .events
            .values()
            .filter(|e| pred(e))
            .map(|e| e.id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.events.remove(&id))
            .collect()
    }

    /// Assigns a scheduled time to every event that doesn't have one yet,
    /// per the dispatch algorithm's step 2. `delay_for` computes the
    /// delay given `(sender, recipient)`; timers are always scheduled
    /// immediately since their scheduled time is fixed at creation
    /// (`created_at + interval`) and never left unassigned.
    pub fn assign_pending_delays(&mut self, mut delay_for: impl FnMut(&str, &str) -> f64) {
        for event in self.events.values_mut() {
            if event.scheduled_at.is_some() {
                continue;
            }
            if let EventKind::Message {
                sender, recipient, ..
            } = &event.kind
            {
                let delay = delay_for(sender, recipient);
                event.scheduled_at = Some(event.created_at + delay);
            }
        }
    }

    /// Ordered-mode selection: the event with the smallest scheduled
    /// time, ties broken by insertion order. Only considers events that
    /// already have a scheduled time (callers must run
    /// `assign_pending_delays` first).
    pub fn argmin_scheduled(&self) -> Option<EventId> {
        self.events
            .values()
            .filter(|e| e.scheduled_at.is_some())
            .min_by(|a, b| {
                a.scheduled_at
                    .partial_cmp(&b.scheduled_at)
                    .unwrap()
                    .then_with(|| a.seq.cmp(&b.seq))
            })
            .map(|e| e.id.clone())
    }

    /// Reordering-mode selection: a uniformly random pending event.
    pub fn random_pick(&self, rng: &mut crate::rng::SimRng) -> Option<EventId> {
        if self.events.is_empty() {
            return None;
        }
        let mut ids: Vec<&EventId> = self.events.keys().collect();
        ids.sort();
        let idx = rng.pick_index(ids.len());
        Some(ids[idx].clone())
    }
}

//! Event store, scheduler, and fault-injection controller for the
//! deterministic distributed-systems test harness.
//!
//! A [`controller::Controller`] holds virtual time, the pending event
//! store, process liveness, and network topology for a single test run.
//! Test code drives it forward with `step`/`steps`/
//! `step_until_local_message`/`step_until_no_events`, injects local
//! messages with `send_local_message`, and asserts on outcomes in
//! between. Connected process shims (`dst-shim`) announce outgoing
//! messages and timers over the control-plane stream; the controller
//! decides when — and whether — each one is actually delivered.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod fault;
pub mod process;
pub mod rng;
pub mod topology;
pub mod transport;

pub use clock::VirtualClock;
pub use config::ControllerConfig;
pub use controller::{Controller, StepResult};
pub use error::ControllerError;
pub use event::{Event, EventId, EventKind, EventStore};
pub use fault::FaultPolicy;
pub use process::{LivenessState, ProcessDescriptor, ProcessRegistry};
pub use rng::SimRng;
pub use topology::NetworkTopology;

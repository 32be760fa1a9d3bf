//! Process-side shim for the deterministic distributed-systems test
//! harness.
//!
//! Embed [`run`] in a user-supplied process's `main`, implementing
//! [`Process`] for its state machine. Under test (`TEST_SERVER` set),
//! every outbound action taken through [`Context`] is announced to the
//! controller and observably delivered to user code only in response to
//! a controller command: outbound actions a callback takes are recorded
//! before the controller ever observes that callback's completion.

mod error;
mod process;
mod shim;

pub use error::ShimError;
pub use process::{Context, Message, Mode, Process};
pub use shim::{run, run_connected};

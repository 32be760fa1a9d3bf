//! Wire codec for the deterministic distributed-systems test harness.
//!
//! Two independent concerns live here, both self-describing JSON over
//! UTF-8:
//!
//! - [`Envelope`]: the user message format carried between processes
//!   (`{type, body?, headers?, sender?, id?}`). Opaque to the controller;
//!   only user code and tests need to decode the body.
//! - [`Frame`] + [`encode_frame`]/[`try_decode_frame`]: length-prefixed
//!   framing for the control-plane stream between a process shim and the
//!   controller, carrying [`ShimEvent`]s and [`Command`]s.

mod control;
mod envelope;
mod frame;

pub use control::{Command, ShimEvent};
pub use envelope::{Envelope, LOCAL, WireError};
pub use frame::{FRAME_HEADER_SIZE, MAX_FRAME_LEN, encode_frame, try_decode_frame};

//! # Core Engine Module
//!
//! The pieces every other module builds on:
//!
//! - **`event`**: the `StreamEvent` record and the line decoder that turns one raw
//!   line of the stream body into an event, a heartbeat, or a malformed signal.
//! - **`dispatcher`**: the ordered name → callback table that fans each decoded
//!   event out to every subscriber, isolating subscriber failures.
//! - **`counter`**: a trivial subscriber counting events and firing a refresh hook.

/// The decoded event record and the line decoder.
pub mod event;
/// Ordered subscriber table and synchronous fan-out.
pub mod dispatcher;
/// Counting subscriber with a periodic refresh hook.
pub mod counter;

// --- Public API Re-exports ---
pub use counter::{CounterError, EventCounter};
pub use dispatcher::{Callback, DispatchReport, Dispatcher};
pub use event::{decode, decode_line, DecodedLine, StreamEvent};

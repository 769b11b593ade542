//! # Ingestors
//!
//! The streaming side of the crate.
//!
//! - `transport`: opens the filtered stream (`StreamTransport`, `HttpStreamTransport`).
//! - `session`: one connection; line splitting, decoding and dispatch.
//! - `controller`: start/stop lifecycle and the reconnect loop.

pub mod controller;
pub mod session;
pub mod transport;

pub use controller::{ReconnectPolicy, StreamController};
pub use session::{
    LineBuffer, SessionOutcome, SharedMetrics, StreamMetrics, StreamSession,
    DEFAULT_MAX_LINE_BYTES,
};
pub use transport::{
    ByteStream, HttpStreamTransport, StreamError, StreamTransport, TransportTimeouts,
};

//! # lib_stream
//!
//! Building blocks for collecting a server-pushed filtered stream of JSON events:
//!
//! - **`core`**: line decoding, the subscriber `Dispatcher` and the `EventCounter`.
//! - **`ingestors`**: the streaming transport, a single-connection `StreamSession`
//!   and the reconnecting `StreamController`.
//! - **`storage`**: the per-tag `RotatingFileWriter` (JSON Lines, size-bounded).
//! - **`retrieve`**: bearer-authenticated HTTP client and the filter rule endpoints.
//! - **`configs`**: settings with defaults, validation and bearer loading.
//!
//! Each folder is gated behind a cargo feature of the same name; `full` (the
//! default) enables all of them.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "storage")]
pub mod storage;

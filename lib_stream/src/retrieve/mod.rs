//! # Data Retrieval Module
//!
//! Request/response HTTP access, as opposed to the long-lived stream in `ingestors`.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic bearer-authenticated `ApiClient` built on `reqwest`.
//! - **`rules`**: the filter rule endpoints (add, list, delete) on top of it.

/// Generic HTTP API client.
pub mod ky_http;
/// Filter rule management.
pub mod rules;

pub use ky_http::{ApiClient, ApiResponse};
pub use rules::{Rule, RulesClient, RulesError, RulesResponse};

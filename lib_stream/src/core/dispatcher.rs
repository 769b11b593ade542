//! # Subscriber Dispatcher
//!
//! The `Dispatcher` is the fan-out point between the ingestion task and every
//! consumer of the stream. It keeps an ordered table of named callbacks and invokes
//! each of them, in order, for every decoded event.
//!
//! ## Behaviour:
//!
//! 1.  **Synchronous Fan-out**: `dispatch` runs every callback on the calling task.
//!     A slow subscriber therefore stalls ingestion of the following lines; delivery
//!     order is the stream order for every subscriber.
//!
//! 2.  **Failure Isolation**: a callback that returns `Err` or panics is logged and
//!     counted in the `DispatchReport`; the remaining callbacks still run and the
//!     ingestion loop keeps going.
//!
//! 3.  **Snapshot Dispatch**: the table is cloned (cheap `Arc` clones) before any
//!     callback runs and no lock is held while they execute. A callback may register
//!     or unregister subscribers, itself included; the change applies from the next
//!     `dispatch` call.
//!
//! 4.  **Replace in Place**: registering an existing name swaps the callback but keeps
//!     its position in the table.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::core::event::StreamEvent;

/// A subscriber callback. Errors are logged by the dispatcher, never propagated.
pub type Callback = Arc<dyn Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync>;

/// # Dispatch Report
///
/// Outcome of one `dispatch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned `Ok`.
    pub delivered: usize,
    /// Callbacks that returned `Err` or panicked.
    pub failed: usize,
}

/// One named registration.
struct Subscriber {
    name: String,
    callback: Callback,
}

/// # Dispatcher
///
/// Ordered name → callback table. Shared as `Arc<Dispatcher>` between the ingestion
/// task and whatever registers subscribers.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// # Register
    ///
    /// Installs `callback` under `name`. An existing registration with the same name
    /// is replaced and keeps its position.
    ///
    /// # Returns
    /// `true` when an existing registration was replaced.
    pub fn register<F>(&self, name: &str, callback: F) -> bool
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_arc(name, Arc::new(callback))
    }

    /// Same as [`Dispatcher::register`] for an already shared callback.
    pub fn register_arc(&self, name: &str, callback: Callback) -> bool {
        let mut subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");

        if let Some(existing) = subscribers.iter_mut().find(|s| s.name == name) {
            existing.callback = callback;
            log::info!("Subscriber '{}' replaced.", name);
            return true;
        }

        subscribers.push(Subscriber {
            name: name.to_string(),
            callback,
        });
        log::info!("Subscriber '{}' registered.", name);
        false
    }

    /// # Unregister
    ///
    /// Removes the callback registered under `name`.
    ///
    /// # Returns
    /// `false` when no such subscriber exists; nothing else happens in that case.
    pub fn unregister(&self, name: &str) -> bool {
        let mut subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|s| s.name != name);

        let removed = subscribers.len() != before;
        if removed {
            log::info!("Subscriber '{}' removed.", name);
        } else {
            log::debug!("Subscriber '{}' not found, nothing removed.", name);
        }
        removed
    }

    /// # Dispatch
    ///
    /// Invokes every registered callback with `event`, in table order, on the calling
    /// task. Callback failures are isolated and reported.
    pub fn dispatch(&self, event: &StreamEvent) -> DispatchReport {
        let snapshot = self.list();
        let mut report = DispatchReport::default();

        for (name, callback) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    log::error!("Subscriber '{}' failed: {:#}", name, e);
                }
                Err(payload) => {
                    report.failed += 1;
                    log::error!("Subscriber '{}' panicked: {}", name, panic_message(&*payload));
                }
            }
        }

        report
    }

    /// Current `(name, callback)` pairs, in dispatch order.
    pub fn list(&self) -> Vec<(String, Callback)> {
        let subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");
        subscribers
            .iter()
            .map(|s| (s.name.clone(), Arc::clone(&s.callback)))
            .collect()
    }

    /// Registered names, in dispatch order.
    pub fn names(&self) -> Vec<String> {
        let subscribers = self.subscribers.lock().expect("Dispatcher lock poisoned");
        subscribers.iter().map(|s| s.name.clone()).collect()
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.lock().expect("Dispatcher lock poisoned").len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

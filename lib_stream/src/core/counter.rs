//! Counting subscriber. Every `refresh_every`-th event fires the refresh hook, which the
//! collector uses to redraw its prompt.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::core::event::StreamEvent;

/// Smallest accepted refresh interval.
pub const MIN_REFRESH: u64 = 10;
/// Refresh interval used when none is configured.
pub const DEFAULT_REFRESH: u64 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CounterError {
    #[error("Refresh value cannot be smaller than {min} (got {value})")]
    RefreshTooSmall { value: u64, min: u64 },
}

pub struct EventCounter {
    count: AtomicU64,
    refresh_every: AtomicU64,
    on_refresh: Box<dyn Fn(u64) + Send + Sync>,
}

impl EventCounter {
    /// Builds a counter. `refresh_every` must be at least [`MIN_REFRESH`].
    pub fn new<F>(refresh_every: u64, on_refresh: F) -> Result<Self, CounterError>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        check_refresh(refresh_every)?;
        Ok(Self {
            count: AtomicU64::new(0),
            refresh_every: AtomicU64::new(refresh_every),
            on_refresh: Box::new(on_refresh),
        })
    }

    /// Subscriber entry point.
    pub fn on_event(&self, _event: &StreamEvent) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let every = self.refresh_every.load(Ordering::Relaxed);
        if every > 0 && count % every == 0 {
            (self.on_refresh)(count);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    pub fn refresh_every(&self) -> u64 {
        self.refresh_every.load(Ordering::Relaxed)
    }

    pub fn set_refresh_every(&self, value: u64) -> Result<(), CounterError> {
        check_refresh(value)?;
        self.refresh_every.store(value, Ordering::Relaxed);
        Ok(())
    }
}

fn check_refresh(value: u64) -> Result<(), CounterError> {
    if value < MIN_REFRESH {
        return Err(CounterError::RefreshTooSmall {
            value,
            min: MIN_REFRESH,
        });
    }
    Ok(())
}

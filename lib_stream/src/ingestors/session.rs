//! # Stream Session
//!
//! One connection's worth of streaming reads: open the transport, split the body
//! into lines, decode each line and hand events to the `Dispatcher`.
//!
//! A session never raises. It ends with a [`SessionOutcome`] that the controller's
//! reconnect loop consumes:
//!
//! - `Completed`: the body ended, cleanly or through a mid-stream connection reset.
//! - `Cancelled`: the cancellation token fired. No dispatch happens afterwards.
//! - `RecoverableFailure`: the stream could not be opened or a read failed
//!   (connect error, non-2xx, timeout).
//!
//! Cancellation is raced against every pending read and checked between lines.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::Dispatcher;
use crate::core::event::{decode, DecodedLine};
use crate::ingestors::transport::{StreamError, StreamTransport};

/// Longest accepted line, in bytes. Longer lines are dropped as malformed.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    RecoverableFailure(StreamError),
}

/// Running counters shared by every session of one controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetrics {
    pub sessions: u64,
    pub reconnections: u64,
    pub failures: u64,
    pub connection_resets: u64,
    pub lines_read: u64,
    pub events_dispatched: u64,
    pub heartbeats: u64,
    pub malformed_lines: u64,
    pub callback_failures: u64,
}

pub type SharedMetrics = Arc<Mutex<StreamMetrics>>;

/// # Line Buffer
///
/// Accumulates body chunks and yields complete `\n`-terminated lines (without the
/// terminator). A line growing past `max_line_bytes` is discarded up to its
/// newline and counted in `dropped`.
///
/// Every byte is scanned for a newline once: `start` marks the first unconsumed
/// byte and `tail_start` the byte after the last newline seen.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    start: usize,
    tail_start: usize,
    max_line_bytes: usize,
    discarding: bool,
    dropped: u64,
}

impl LineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            start: 0,
            tail_start: 0,
            max_line_bytes,
            discarding: false,
            dropped: 0,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        let mut chunk = chunk;
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(index) => {
                    self.discarding = false;
                    chunk = &chunk[index + 1..];
                }
                None => return,
            }
        }
        self.compact();

        let offset = self.pending.len();
        self.pending.extend_from_slice(chunk);
        if let Some(index) = chunk.iter().rposition(|b| *b == b'\n') {
            self.tail_start = offset + index + 1;
        }
        if self.pending.len() - self.tail_start > self.max_line_bytes {
            self.pending.truncate(self.tail_start);
            self.discarding = true;
            self.dropped += 1;
        }
    }

    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let complete = &self.pending[self.start..self.tail_start];
            let length = complete.iter().position(|b| *b == b'\n')?;
            let line_start = self.start;
            self.start += length + 1;
            if length > self.max_line_bytes {
                self.dropped += 1;
                continue;
            }
            return Some(self.pending[line_start..line_start + length].to_vec());
        }
    }

    /// Whatever is left once the body has ended, if anything.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = (!self.discarding && self.start < self.pending.len())
            .then(|| self.pending[self.start..].to_vec());
        self.pending.clear();
        self.start = 0;
        self.tail_start = 0;
        rest
    }

    /// Number of oversized lines dropped since the last call.
    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }

    /// Drops consumed bytes once they make up at least half the buffer.
    fn compact(&mut self) {
        if self.start == 0 || self.start < self.pending.len() / 2 {
            return;
        }
        self.pending.drain(..self.start);
        self.tail_start -= self.start;
        self.start = 0;
    }
}

/// # Stream Session
///
/// Owns exactly one connection. Construct a fresh session for every reconnect.
pub struct StreamSession {
    transport: Arc<dyn StreamTransport>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    metrics: SharedMetrics,
    max_line_bytes: usize,
}

impl StreamSession {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            cancel,
            metrics: SharedMetrics::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Records counters into `metrics` instead of a private instance.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Reads the stream until it ends, fails, or the token is cancelled.
    pub async fn run(self) -> SessionOutcome {
        if self.cancel.is_cancelled() {
            return SessionOutcome::Cancelled;
        }

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SessionOutcome::Cancelled,
            opened = self.transport.open() => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(e) => return SessionOutcome::RecoverableFailure(e),
        };
        log::info!("Connected to stream endpoint {}", self.transport.endpoint());

        let mut lines = LineBuffer::new(self.max_line_bytes);
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionOutcome::Cancelled,
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    lines.extend(&chunk);
                    while let Some(line) = lines.next_line() {
                        if self.cancel.is_cancelled() {
                            return SessionOutcome::Cancelled;
                        }
                        self.handle_line(&line);
                    }
                    self.record_dropped(&mut lines);
                }
                Some(Err(e)) if e.is_connection_reset() => {
                    log::info!("Stream connection reset: {}", e);
                    self.metrics.lock().expect("Metrics lock poisoned").connection_resets += 1;
                    return SessionOutcome::Completed;
                }
                Some(Err(e)) => return SessionOutcome::RecoverableFailure(e),
                None => {
                    if let Some(rest) = lines.finish() {
                        self.handle_line(&rest);
                    }
                    self.record_dropped(&mut lines);
                    log::info!("Stream closed by remote host.");
                    return SessionOutcome::Completed;
                }
            }
        }
    }

    fn handle_line(&self, line: &[u8]) {
        let decoded = decode(line);
        {
            let mut metrics = self.metrics.lock().expect("Metrics lock poisoned");
            metrics.lines_read += 1;
            match &decoded {
                DecodedLine::Event(_) => metrics.events_dispatched += 1,
                DecodedLine::Heartbeat => metrics.heartbeats += 1,
                DecodedLine::Malformed => metrics.malformed_lines += 1,
            }
        }

        match decoded {
            DecodedLine::Event(event) => {
                let report = self.dispatcher.dispatch(&event);
                if report.failed > 0 {
                    self.metrics.lock().expect("Metrics lock poisoned").callback_failures +=
                        report.failed as u64;
                }
            }
            DecodedLine::Heartbeat => log::trace!("Heartbeat received."),
            DecodedLine::Malformed => {
                log::debug!("Dropping malformed line ({} bytes).", line.len());
            }
        }
    }

    fn record_dropped(&self, lines: &mut LineBuffer) {
        let dropped = lines.take_dropped();
        if dropped > 0 {
            log::warn!("Dropped {} line(s) longer than {} bytes.", dropped, self.max_line_bytes);
            self.metrics.lock().expect("Metrics lock poisoned").malformed_lines += dropped;
        }
    }
}

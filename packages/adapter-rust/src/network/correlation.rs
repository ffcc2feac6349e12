//! Matches asynchronous replies to outstanding requests by `trace_id`.
//!
//! ```text
//!   caller                         tracker                    session loop
//!   ──────                         ───────                    ────────────
//!   register(trace_id) ──────────► pending[trace_id] = tx
//!   send request
//!   wait() ◄───────────────────────────────────────────────── resolve(trace_id, env)
//!                                  pending.remove(trace_id)
//! ```
//!
//! The pending table is a `DashMap`, so registration from client-role tasks
//! and resolution from the session loop never need a shared lock. Every entry
//! carries a ticket number; a [`PendingReply`] only ever removes the entry it
//! created, even if the same `trace_id` has since been registered again.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meshlink_core::Envelope;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Failure completing a correlated request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// No reply arrived before the deadline.
    #[error("no reply for trace_id {trace_id} within {timeout_ms}ms")]
    Timeout { trace_id: String, timeout_ms: u64 },
    /// The entry was cancelled, typically because the connection dropped.
    #[error("request {trace_id} cancelled: {reason}")]
    Cancelled { trace_id: String, reason: String },
    /// A request with the same `trace_id` is already outstanding.
    #[error("trace_id {0} is already pending")]
    DuplicateTraceId(String),
    /// The pending table is at capacity.
    #[error("too many pending requests (limit {limit})")]
    TooManyPending { limit: usize },
}

type Resolution = Result<Envelope, CorrelationError>;

#[derive(Debug)]
struct PendingEntry {
    ticket: u64,
    tx: oneshot::Sender<Resolution>,
    issued_at: Instant,
    _slot: Slot,
}

/// One unit of pending-table capacity, returned when the entry is removed.
#[derive(Debug)]
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// CorrelationTracker
// ---------------------------------------------------------------------------

/// Table of outstanding requests awaiting a reply.
#[derive(Debug)]
pub struct CorrelationTracker {
    pending: DashMap<String, PendingEntry>,
    next_ticket: AtomicU64,
    reserved: Arc<AtomicUsize>,
    max_pending: usize,
}

impl CorrelationTracker {
    /// Creates a tracker that accepts at most `max_pending` outstanding requests.
    #[must_use]
    pub fn new(max_pending: usize) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            next_ticket: AtomicU64::new(1),
            reserved: Arc::new(AtomicUsize::new(0)),
            max_pending,
        })
    }

    /// Registers a request and returns the waitable for its reply.
    ///
    /// `timeout` of `None` waits until resolution or cancellation.
    ///
    /// # Errors
    ///
    /// `DuplicateTraceId` if `trace_id` is already outstanding,
    /// `TooManyPending` if the table is full.
    pub fn register(
        self: &Arc<Self>,
        trace_id: &str,
        timeout: Option<Duration>,
    ) -> Result<PendingReply, CorrelationError> {
        let Some(reserved) = self.reserve_slot() else {
            tracing::warn!(
                pending = self.pending.len(),
                limit = self.max_pending,
                "too many pending requests; refusing new request"
            );
            return Err(CorrelationError::TooManyPending {
                limit: self.max_pending,
            });
        };

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let issued_at = Instant::now();

        match self.pending.entry(trace_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(CorrelationError::DuplicateTraceId(trace_id.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    ticket,
                    tx,
                    issued_at,
                    _slot: reserved,
                });
            }
        }

        tracing::debug!(trace_id, pending = self.pending.len(), "registered pending request");

        Ok(PendingReply {
            trace_id: trace_id.to_string(),
            ticket,
            rx,
            issued_at,
            timeout,
            tracker: Arc::downgrade(self),
        })
    }

    /// Completes the request waiting on `trace_id` with `response`.
    ///
    /// Returns `false` (and logs) when nothing is waiting: a late reply after
    /// a timeout, a duplicate reply, or a reply to someone else's request.
    pub fn resolve(&self, trace_id: &str, response: Envelope) -> bool {
        let Some((_, entry)) = self.pending.remove(trace_id) else {
            tracing::debug!(trace_id, "reply matches no pending request; dropping");
            return false;
        };

        let elapsed_ms = entry.issued_at.elapsed().as_secs_f64() * 1000.0;
        if entry.tx.send(Ok(response)).is_err() {
            tracing::debug!(trace_id, "waiter gone before reply arrived");
            return false;
        }
        tracing::debug!(trace_id, elapsed_ms, "resolved pending request");
        true
    }

    /// Fails every outstanding request with `reason`. Returns how many were
    /// cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();

        let mut cancelled = 0;
        for trace_id in keys {
            if let Some((trace_id, entry)) = self.pending.remove(&trace_id) {
                let _ = entry.tx.send(Err(CorrelationError::Cancelled {
                    trace_id,
                    reason: reason.to_string(),
                }));
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            tracing::info!(cancelled, reason, "cancelled pending requests");
        }
        cancelled
    }

    #[must_use]
    pub fn contains(&self, trace_id: &str) -> bool {
        self.pending.contains_key(trace_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Claims capacity for one entry, or `None` at the limit.
    fn reserve_slot(&self) -> Option<Slot> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_pending).then_some(n + 1)
            })
            .ok()
            .map(|_| Slot(Arc::clone(&self.reserved)))
    }

    fn remove_ticket(&self, trace_id: &str, ticket: u64) -> bool {
        self.pending
            .remove_if(trace_id, |_, entry| entry.ticket == ticket)
            .is_some()
    }
}

// ---------------------------------------------------------------------------
// PendingReply
// ---------------------------------------------------------------------------

/// Waitable for one correlated reply.
///
/// Dropping it without waiting removes the entry from the tracker, so an
/// abandoned request never leaks.
#[derive(Debug)]
pub struct PendingReply {
    trace_id: String,
    ticket: u64,
    rx: oneshot::Receiver<Resolution>,
    issued_at: Instant,
    timeout: Option<Duration>,
    tracker: Weak<CorrelationTracker>,
}

impl PendingReply {
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    #[must_use]
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Waits for the reply, the deadline, or cancellation.
    ///
    /// # Errors
    ///
    /// `Timeout` when the deadline passes first (the entry is removed),
    /// `Cancelled` when the tracker cancels the entry or is dropped.
    pub async fn wait(mut self) -> Result<Envelope, CorrelationError> {
        let received = match self.timeout {
            Some(timeout) => {
                match tokio::time::timeout_at(self.issued_at + timeout, &mut self.rx).await {
                    Ok(received) => received,
                    Err(_) => {
                        self.forget();
                        #[allow(clippy::cast_possible_truncation)]
                        let timeout_ms = timeout.as_millis() as u64;
                        tracing::debug!(
                            trace_id = %self.trace_id,
                            timeout_ms,
                            "pending request timed out"
                        );
                        return Err(CorrelationError::Timeout {
                            trace_id: self.trace_id.clone(),
                            timeout_ms,
                        });
                    }
                }
            }
            None => (&mut self.rx).await,
        };

        received.unwrap_or_else(|_| {
            Err(CorrelationError::Cancelled {
                trace_id: self.trace_id.clone(),
                reason: "tracker dropped".to_string(),
            })
        })
    }

    fn forget(&self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.remove_ticket(&self.trace_id, self.ticket);
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.forget();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Bounded, TTL-aware, priority-ordered request queue.
//!
//! The queue holds [`BatchRequest`]s ordered by priority (higher first,
//! FIFO within a priority). Dequeued requests stay in the slice so status
//! lookups and cleanup keep working; terminal entries are garbage-collected
//! by [`BatchQueue::cleanup`]. Expiry is lazy: a pending request past its
//! deadline transitions to [`BatchStatus::Expired`] the next time anything
//! looks at it ([`BatchQueue::dequeue`], [`BatchQueue::status`], or the
//! bulk [`BatchQueue::expire_stale`]).
//!
//! Status transitions are one-way:
//! `pending -> processing -> {completed, failed}` and
//! `pending -> {cancelled, expired}`. Once terminal, a ticket never
//! changes again, and its callback has fired exactly once (on completion,
//! failure, or expiry; drained requests are returned to the caller to
//! fire).
//!
//! With the expected queue sizes (at most a few thousand entries) a linear
//! scan both preserves FIFO order and gives O(n) status lookups; an
//! indexed heap would only pay off well past that.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use manifold_types::BatchConfig;

// ── Errors ─────────────────────────────────────────────────────────────

/// Sentinel errors from the batch subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity.
    #[error("queue is full")]
    QueueFull,

    /// No request with the given ticket id.
    #[error("request not found: {0}")]
    RequestNotFound(String),

    /// A request with the given ticket id is already queued.
    #[error("duplicate ticket id: {0}")]
    DuplicateTicket(String),

    /// The request was already cancelled.
    #[error("request already cancelled: {0}")]
    AlreadyCancelled(String),

    /// The request is past its deadline.
    #[error("request expired: {0}")]
    RequestExpired(String),

    /// The request is in a state the operation does not apply to.
    #[error("request {id} is {status}")]
    InvalidState {
        /// The ticket id.
        id: String,
        /// The state it was found in.
        status: BatchStatus,
    },

    /// The background processor shut down before the request ran.
    #[error("batch processor stopped")]
    ProcessorStopped,
}

// ── Priority and status ────────────────────────────────────────────────

/// Request priority; higher dequeues first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BatchPriority {
    /// Background work.
    Low,
    /// Ordinary deferred requests.
    #[default]
    Normal,
    /// Requests a user is waiting on.
    High,
    /// Dequeue before everything else.
    Urgent,
}

/// Lifecycle state of a batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Waiting in the queue.
    Pending,
    /// Handed to a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before processing.
    Cancelled,
    /// Passed its deadline before processing.
    Expired,
}

impl BatchStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Cancelled
                | BatchStatus::Expired
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

// ── BatchRequest ───────────────────────────────────────────────────────

/// Invoked exactly once when a request reaches a terminal state.
pub type BatchCallback = Arc<dyn Fn(&BatchRequest) + Send + Sync>;

/// One deferred request and its lifecycle state.
#[derive(Clone)]
pub struct BatchRequest {
    /// Unique ticket id (caller-supplied or generated at enqueue).
    pub ticket_id: String,
    /// Session the request belongs to.
    pub session_key: String,
    /// The user message to route.
    pub message: String,
    /// Model override forwarded to the router. The original multi-provider
    /// hint collapses to this since the core drives one injected provider.
    pub requested_model: Option<String>,
    /// Queue priority.
    pub priority: BatchPriority,
    /// Terminal-state callback.
    pub callback: Option<BatchCallback>,
    /// When the request was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Deadline; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: BatchStatus,
    /// Response content on completion.
    pub result: Option<String>,
    /// Error description on failure, cancellation, or expiry.
    pub error: Option<String>,
    /// When the request reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchRequest {
    /// Create a pending request with normal priority and no deadline.
    pub fn new(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ticket_id: String::new(),
            session_key: session_key.into(),
            message: message.into(),
            requested_model: None,
            priority: BatchPriority::Normal,
            callback: None,
            enqueued_at: Utc::now(),
            expires_at: None,
            status: BatchStatus::Pending,
            result: None,
            error: None,
            finished_at: None,
        }
    }

    /// Set an explicit ticket id.
    pub fn with_ticket_id(mut self, id: impl Into<String>) -> Self {
        self.ticket_id = id.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: BatchPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set an explicit deadline.
    pub fn with_expires_at(mut self, deadline: DateTime<Utc>) -> Self {
        self.expires_at = Some(deadline);
        self
    }

    /// Set a deadline relative to now. A TTL beyond representable time
    /// leaves the request without a deadline.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        if let Ok(ttl) = chrono::Duration::from_std(ttl) {
            self.expires_at = Some(Utc::now() + ttl);
        }
        self
    }

    /// Set a model override.
    pub fn with_requested_model(mut self, model: impl Into<String>) -> Self {
        self.requested_model = Some(model.into());
        self
    }

    /// Set the terminal-state callback.
    pub fn with_callback(mut self, callback: BatchCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

impl std::fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRequest")
            .field("ticket_id", &self.ticket_id)
            .field("session_key", &self.session_key)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("enqueued_at", &self.enqueued_at)
            .field("expires_at", &self.expires_at)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Status-lookup detail for one ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusDetail {
    /// The ticket id.
    pub ticket_id: String,
    /// Current lifecycle state.
    pub status: BatchStatus,
    /// Priority at enqueue.
    pub priority: BatchPriority,
    /// 1-based rank among pending requests; `None` once not pending.
    pub position: Option<usize>,
    /// When the request was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Deadline, when one is set.
    pub expires_at: Option<DateTime<Utc>>,
    /// Response content on completion.
    pub result: Option<String>,
    /// Error description on failure, cancellation, or expiry.
    pub error: Option<String>,
}

// ── BatchQueue ─────────────────────────────────────────────────────────

struct QueueState {
    entries: Vec<BatchRequest>,
    index: HashMap<String, usize>,
}

impl QueueState {
    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.ticket_id.clone(), i))
            .collect();
    }
}

/// Priority-ordered, TTL-aware request queue.
pub struct BatchQueue {
    state: Mutex<QueueState>,
    max_size: usize,
    default_ttl: Option<Duration>,
}

impl BatchQueue {
    /// Create a queue from config (`max_size = 0` means unlimited).
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: Vec::new(),
                index: HashMap::new(),
            }),
            max_size: config.max_size,
            default_ttl: config.default_ttl(),
        }
    }

    /// An unbounded queue with no default TTL (tests and embedders that
    /// manage deadlines themselves).
    pub fn unbounded() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: Vec::new(),
                index: HashMap::new(),
            }),
            max_size: 0,
            default_ttl: None,
        }
    }

    /// Add a request. Returns its ticket id (generated when the request
    /// carried none). The configured default TTL applies only when the
    /// request has no explicit deadline.
    pub fn enqueue(&self, mut request: BatchRequest) -> Result<String, QueueError> {
        let mut state = self.state.lock().expect("batch queue lock poisoned");

        if self.max_size > 0 && state.entries.len() >= self.max_size {
            return Err(QueueError::QueueFull);
        }

        if request.ticket_id.is_empty() {
            request.ticket_id = format!("bat-{}", Uuid::new_v4());
        } else if state.index.contains_key(&request.ticket_id) {
            return Err(QueueError::DuplicateTicket(request.ticket_id));
        }

        request.status = BatchStatus::Pending;
        request.enqueued_at = Utc::now();
        if request.expires_at.is_none()
            && let Some(ttl) = self.default_ttl
            && let Ok(ttl) = chrono::Duration::from_std(ttl)
        {
            request.expires_at = Some(request.enqueued_at + ttl);
        }

        let id = request.ticket_id.clone();
        // Higher priority first; FIFO within a priority band.
        let position = state
            .entries
            .iter()
            .position(|e| e.priority < request.priority)
            .unwrap_or(state.entries.len());
        state.entries.insert(position, request);
        state.rebuild_index();

        debug!(ticket = %id, position, "batch request enqueued");
        Ok(id)
    }

    /// Pop the highest-priority eligible request, marking it processing.
    /// Pending requests found past their deadline transition to expired
    /// (their callbacks fire) and are skipped.
    pub fn dequeue(&self) -> Option<BatchRequest> {
        let now = Utc::now();
        let mut expired: Vec<BatchRequest> = Vec::new();
        let picked = {
            let mut state = self.state.lock().expect("batch queue lock poisoned");
            let mut picked = None;
            for entry in &mut state.entries {
                if entry.status != BatchStatus::Pending {
                    continue;
                }
                if entry.is_past_deadline(now) {
                    entry.status = BatchStatus::Expired;
                    entry.error = Some(QueueError::RequestExpired(entry.ticket_id.clone()).to_string());
                    entry.finished_at = Some(now);
                    expired.push(entry.clone());
                    continue;
                }
                entry.status = BatchStatus::Processing;
                picked = Some(entry.clone());
                break;
            }
            picked
        };

        for request in &expired {
            fire_callback(request);
        }
        picked
    }

    /// Mark a processing ticket completed and fire its callback.
    pub fn complete(&self, ticket_id: &str, result: String) -> Result<(), QueueError> {
        self.finish(ticket_id, BatchStatus::Completed, Some(result), None)
    }

    /// Mark a processing ticket failed and fire its callback.
    pub fn fail(&self, ticket_id: &str, error: String) -> Result<(), QueueError> {
        self.finish(ticket_id, BatchStatus::Failed, None, Some(error))
    }

    /// Cancel a pending ticket. No callback fires for an explicit cancel.
    pub fn cancel(&self, ticket_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("batch queue lock poisoned");
        let idx = *state
            .index
            .get(ticket_id)
            .ok_or_else(|| QueueError::RequestNotFound(ticket_id.into()))?;
        let entry = &mut state.entries[idx];
        match entry.status {
            BatchStatus::Pending => {
                entry.status = BatchStatus::Cancelled;
                entry.finished_at = Some(Utc::now());
                debug!(ticket = ticket_id, "batch request cancelled");
                Ok(())
            }
            BatchStatus::Cancelled => Err(QueueError::AlreadyCancelled(ticket_id.into())),
            status => Err(QueueError::InvalidState {
                id: ticket_id.into(),
                status,
            }),
        }
    }

    /// Current status of a ticket, lazily expiring it when overdue.
    pub fn status(&self, ticket_id: &str) -> Result<BatchStatus, QueueError> {
        self.status_detail(ticket_id).map(|d| d.status)
    }

    /// Full status detail, including the 1-based pending-queue position.
    pub fn status_detail(&self, ticket_id: &str) -> Result<BatchStatusDetail, QueueError> {
        let now = Utc::now();
        let mut newly_expired = None;
        let detail = {
            let mut state = self.state.lock().expect("batch queue lock poisoned");
            let idx = *state
                .index
                .get(ticket_id)
                .ok_or_else(|| QueueError::RequestNotFound(ticket_id.into()))?;

            if state.entries[idx].status == BatchStatus::Pending
                && state.entries[idx].is_past_deadline(now)
            {
                let entry = &mut state.entries[idx];
                entry.status = BatchStatus::Expired;
                entry.error = Some(QueueError::RequestExpired(entry.ticket_id.clone()).to_string());
                entry.finished_at = Some(now);
                newly_expired = Some(entry.clone());
            }

            let entry = &state.entries[idx];
            let position = (entry.status == BatchStatus::Pending).then(|| {
                state.entries[..idx]
                    .iter()
                    .filter(|e| e.status == BatchStatus::Pending)
                    .count()
                    + 1
            });
            BatchStatusDetail {
                ticket_id: entry.ticket_id.clone(),
                status: entry.status,
                priority: entry.priority,
                position,
                enqueued_at: entry.enqueued_at,
                expires_at: entry.expires_at,
                result: entry.result.clone(),
                error: entry.error.clone(),
            }
        };

        if let Some(request) = &newly_expired {
            fire_callback(request);
        }
        Ok(detail)
    }

    /// Cancel every pending request with [`QueueError::ProcessorStopped`]
    /// and return them. Callbacks do **not** fire here -- the caller runs
    /// them (the processor does so on shutdown).
    pub fn drain_all(&self) -> Vec<BatchRequest> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("batch queue lock poisoned");
        let mut drained = Vec::new();
        for entry in &mut state.entries {
            if entry.status == BatchStatus::Pending {
                entry.status = BatchStatus::Cancelled;
                entry.error = Some(QueueError::ProcessorStopped.to_string());
                entry.finished_at = Some(now);
                drained.push(entry.clone());
            }
        }
        debug!(count = drained.len(), "batch queue drained");
        drained
    }

    /// Transition every overdue pending request to expired, firing their
    /// callbacks. Returns how many expired.
    pub fn expire_stale(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<BatchRequest> = {
            let mut state = self.state.lock().expect("batch queue lock poisoned");
            let mut expired = Vec::new();
            for entry in &mut state.entries {
                if entry.status == BatchStatus::Pending && entry.is_past_deadline(now) {
                    entry.status = BatchStatus::Expired;
                    entry.error =
                        Some(QueueError::RequestExpired(entry.ticket_id.clone()).to_string());
                    entry.finished_at = Some(now);
                    expired.push(entry.clone());
                }
            }
            expired
        };

        for request in &expired {
            fire_callback(request);
        }
        expired.len()
    }

    /// Remove terminal entries older than `older_than` from the slice and
    /// the id index. Returns how many were removed.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            // An age beyond representable time removes nothing.
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let mut state = self.state.lock().expect("batch queue lock poisoned");
        let before = state.entries.len();
        state.entries.retain(|e| {
            !(e.status.is_terminal() && e.finished_at.is_some_and(|at| at <= cutoff))
        });
        let removed = before - state.entries.len();
        if removed > 0 {
            state.rebuild_index();
            debug!(removed, "batch queue cleaned up");
        }
        removed
    }

    /// Requests currently pending.
    pub fn pending_count(&self) -> usize {
        let state = self.state.lock().expect("batch queue lock poisoned");
        state
            .entries
            .iter()
            .filter(|e| e.status == BatchStatus::Pending)
            .count()
    }

    /// Total entries, terminal ones included until cleanup.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("batch queue lock poisoned")
            .entries
            .len()
    }

    /// Returns `true` when the queue holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep-copied view of every entry, queue order.
    pub fn snapshot(&self) -> Vec<BatchRequest> {
        self.state
            .lock()
            .expect("batch queue lock poisoned")
            .entries
            .clone()
    }

    fn finish(
        &self,
        ticket_id: &str,
        status: BatchStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let finished = {
            let mut state = self.state.lock().expect("batch queue lock poisoned");
            let idx = *state
                .index
                .get(ticket_id)
                .ok_or_else(|| QueueError::RequestNotFound(ticket_id.into()))?;
            let entry = &mut state.entries[idx];
            if entry.status != BatchStatus::Processing {
                return Err(QueueError::InvalidState {
                    id: ticket_id.into(),
                    status: entry.status,
                });
            }
            entry.status = status;
            entry.result = result;
            entry.error = error;
            entry.finished_at = Some(Utc::now());
            entry.clone()
        };

        debug!(ticket = ticket_id, %status, "batch request finished");
        fire_callback(&finished);
        Ok(())
    }
}

fn fire_callback(request: &BatchRequest) {
    if let Some(callback) = &request.callback {
        callback(request);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

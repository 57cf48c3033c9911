//! Background worker loop over the batch queue.
//!
//! [`BatchProcessor`] ticks at a fixed poll interval. Each tick it sweeps
//! expired requests, consults the optional capacity checker, and then
//! acquires concurrency permits one at a time -- dequeue, spawn a worker,
//! release the permit when the worker exits. Workers re-check the deadline
//! (a request can age out while queued), route through the
//! [`SmartRouter`], and settle the ticket.
//!
//! [`BatchProcessor::start`] is idempotent. [`BatchProcessor::stop`]
//! signals the loop cooperatively, waits for in-flight workers, then
//! drains everything still pending and runs those callbacks with
//! [`QueueError::ProcessorStopped`] -- it never kills a worker mid-flight.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::batch::queue::{BatchQueue, BatchRequest, QueueError};
use crate::external::CapacityChecker;
use crate::orchestrator::{RouteRequest, SmartRouter};

/// Default tick interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default worker concurrency.
pub const DEFAULT_MAX_CONCURRENT: usize = 1;

struct ProcessorInner {
    running: bool,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

/// Ticker-driven, concurrency-limited queue drainer.
pub struct BatchProcessor {
    queue: Arc<BatchQueue>,
    router: Arc<SmartRouter>,
    capacity: Option<CapacityChecker>,
    poll_interval: Duration,
    max_concurrent: usize,
    inner: Mutex<ProcessorInner>,
}

impl BatchProcessor {
    /// Create a processor over a queue and router with the defaults.
    pub fn new(queue: Arc<BatchQueue>, router: Arc<SmartRouter>) -> Self {
        Self {
            queue,
            router,
            capacity: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            inner: Mutex::new(ProcessorInner {
                running: false,
                shutdown: None,
                handle: None,
            }),
        }
    }

    /// Set the tick interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the worker concurrency limit.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Attach a capacity predicate; ticks skip dequeuing while it says no.
    pub fn with_capacity_checker(mut self, checker: CapacityChecker) -> Self {
        self.capacity = Some(checker);
        self
    }

    /// Whether the loop task is running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().expect("batch processor lock poisoned").running
    }

    /// Spawn the loop task. Calling again while running is a no-op.
    pub fn start(&self) {
        let mut inner = self.inner.lock().expect("batch processor lock poisoned");
        if inner.running {
            debug!("batch processor already running");
            return;
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.queue.clone(),
            self.router.clone(),
            self.capacity.clone(),
            self.poll_interval,
            self.max_concurrent,
            rx,
        ));
        inner.shutdown = Some(tx);
        inner.handle = Some(handle);
        inner.running = true;
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "batch processor started");
    }

    /// Signal the loop, await in-flight workers, and drain the queue.
    /// Stopping an already-stopped processor is a no-op.
    pub async fn stop(&self) {
        let (shutdown, handle) = {
            let mut inner = self.inner.lock().expect("batch processor lock poisoned");
            if !inner.running {
                return;
            }
            inner.running = false;
            (inner.shutdown.take(), inner.handle.take())
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(%err, "batch processor loop task panicked");
            }
        }
        info!("batch processor stopped");
    }
}

async fn run_loop(
    queue: Arc<BatchQueue>,
    router: Arc<SmartRouter>,
    capacity: Option<CapacityChecker>,
    poll_interval: Duration,
    max_concurrent: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut workers: JoinSet<()> = JoinSet::new();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let expired = queue.expire_stale();
                if expired > 0 {
                    debug!(expired, "expired stale batch requests");
                }

                if let Some(check) = &capacity
                    && !check()
                {
                    debug!("provider at capacity, skipping batch tick");
                    continue;
                }

                loop {
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        break;
                    };
                    let Some(request) = queue.dequeue() else {
                        drop(permit);
                        break;
                    };
                    let queue = queue.clone();
                    let router = router.clone();
                    workers.spawn(async move {
                        process_one(&queue, &router, request).await;
                        drop(permit);
                    });
                }

                // Reap workers that already finished.
                while workers.try_join_next().is_some() {}
            }
        }
    }

    // Cooperative shutdown: let in-flight workers finish.
    while workers.join_next().await.is_some() {}

    // Everything still pending is cancelled; run the callbacks here.
    for request in queue.drain_all() {
        if let Some(callback) = &request.callback {
            callback(&request);
        }
    }
}

async fn process_one(queue: &BatchQueue, router: &SmartRouter, request: BatchRequest) {
    // The deadline may have passed between dequeue and dispatch. The
    // ticket is already processing, so it settles as failed-expired
    // rather than re-entering the pending expiry path.
    if request
        .expires_at
        .is_some_and(|deadline| deadline <= Utc::now())
    {
        let reason = QueueError::RequestExpired(request.ticket_id.clone()).to_string();
        if let Err(err) = queue.fail(&request.ticket_id, reason) {
            warn!(ticket = %request.ticket_id, %err, "failed to settle expired ticket");
        }
        return;
    }

    let mut route_request = RouteRequest::new(request.session_key.clone(), request.message.clone());
    route_request.requested_model = request.requested_model.clone();

    match router.route(&route_request).await {
        Ok(result) => {
            debug!(ticket = %request.ticket_id, "batch request completed");
            if let Err(err) = queue.complete(&request.ticket_id, result.response.content) {
                warn!(ticket = %request.ticket_id, %err, "failed to settle completed ticket");
            }
        }
        Err(route_err) => {
            debug!(ticket = %request.ticket_id, %route_err, "batch request failed");
            if let Err(err) = queue.fail(&request.ticket_id, route_err.to_string()) {
                warn!(ticket = %request.ticket_id, %err, "failed to settle failed ticket");
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::batch::queue::{BatchPriority, BatchStatus};
    use crate::usage::UsageTracker;
    use manifold_llm::{ChatRequest, ChatResponse, Provider, ProviderError, Result, Usage};
    use manifold_types::RouterConfig;

    /// Succeeds every call, echoing a canned string.
    struct EchoProvider {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl EchoProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProviderError::AuthFailed("nope".into()));
            }
            Ok(ChatResponse {
                content: "echoed".into(),
                tool_calls: Vec::new(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            })
        }
    }

    fn make_router(provider: Arc<EchoProvider>) -> Arc<SmartRouter> {
        Arc::new(SmartRouter::new(
            provider,
            Arc::new(UsageTracker::default()),
            RouterConfig::default(),
        ))
    }

    fn fast_processor(queue: Arc<BatchQueue>, router: Arc<SmartRouter>) -> BatchProcessor {
        BatchProcessor::new(queue, router).with_poll_interval(Duration::from_millis(10))
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within budget");
    }

    #[tokio::test]
    async fn processes_queued_request_to_completion() {
        let provider = EchoProvider::new();
        let queue = Arc::new(BatchQueue::unbounded());
        let processor = fast_processor(queue.clone(), make_router(provider));

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        let id = queue
            .enqueue(
                BatchRequest::new("sess", "hi").with_callback(Arc::new(move |req| {
                    assert_eq!(req.status, BatchStatus::Completed);
                    assert_eq!(req.result.as_deref(), Some("echoed"));
                    fired_in_cb.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        processor.start();
        let queue_for_wait = queue.clone();
        let id_for_wait = id.clone();
        wait_for(move || {
            queue_for_wait.status(&id_for_wait).unwrap() == BatchStatus::Completed
        })
        .await;
        processor.stop().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_route_marks_ticket_failed() {
        let provider = EchoProvider::new();
        provider.fail.store(true, Ordering::SeqCst);
        let queue = Arc::new(BatchQueue::unbounded());
        let processor = fast_processor(queue.clone(), make_router(provider));

        let id = queue.enqueue(BatchRequest::new("sess", "hi")).unwrap();
        processor.start();
        let queue_for_wait = queue.clone();
        let id_for_wait = id.clone();
        wait_for(move || queue_for_wait.status(&id_for_wait).unwrap() == BatchStatus::Failed).await;
        processor.stop().await;

        let detail = queue.status_detail(&id).unwrap();
        assert!(detail.error.as_deref().unwrap_or_default().contains("authentication"));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let provider = EchoProvider::new();
        let queue = Arc::new(BatchQueue::unbounded());
        let processor = fast_processor(queue.clone(), make_router(provider.clone()));

        processor.start();
        processor.start();
        assert!(processor.is_running());

        let id = queue.enqueue(BatchRequest::new("sess", "hi")).unwrap();
        let queue_for_wait = queue.clone();
        wait_for(move || queue_for_wait.status(&id).unwrap() == BatchStatus::Completed).await;
        processor.stop().await;

        // A single loop serviced the request exactly once.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_drains_pending_with_callbacks() {
        let provider = EchoProvider::new();
        let queue = Arc::new(BatchQueue::unbounded());
        // A closed capacity gate keeps every tick from dequeuing, so the
        // requests are still pending when stop() drains.
        let processor = BatchProcessor::new(queue.clone(), make_router(provider))
            .with_poll_interval(Duration::from_millis(10))
            .with_capacity_checker(Arc::new(|| false));

        let fired = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let fired = fired.clone();
            queue
                .enqueue(
                    BatchRequest::new("sess", format!("r{i}")).with_callback(Arc::new(
                        move |req| {
                            assert_eq!(req.status, BatchStatus::Cancelled);
                            assert_eq!(
                                req.error.as_deref(),
                                Some("batch processor stopped")
                            );
                            fired.fetch_add(1, Ordering::SeqCst);
                        },
                    )),
                )
                .unwrap();
        }

        processor.start();
        processor.stop().await;

        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn stop_twice_is_noop() {
        let provider = EchoProvider::new();
        let queue = Arc::new(BatchQueue::unbounded());
        let processor = fast_processor(queue, make_router(provider));

        processor.start();
        processor.stop().await;
        processor.stop().await;
        assert!(!processor.is_running());
    }

    #[tokio::test]
    async fn capacity_checker_blocks_dequeue() {
        let provider = EchoProvider::new();
        let queue = Arc::new(BatchQueue::unbounded());
        let gate = Arc::new(AtomicBool::new(false));
        let gate_for_checker = gate.clone();
        let processor = fast_processor(queue.clone(), make_router(provider))
            .with_capacity_checker(Arc::new(move || gate_for_checker.load(Ordering::SeqCst)));

        let id = queue.enqueue(BatchRequest::new("sess", "hi")).unwrap();
        processor.start();

        // Several ticks pass with the gate closed.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(queue.status(&id).unwrap(), BatchStatus::Pending);

        gate.store(true, Ordering::SeqCst);
        let queue_for_wait = queue.clone();
        wait_for(move || queue_for_wait.status(&id).unwrap() == BatchStatus::Completed).await;
        processor.stop().await;
    }

    #[tokio::test]
    async fn expired_request_never_dispatched() {
        let provider = EchoProvider::new();
        let queue = Arc::new(BatchQueue::unbounded());
        let processor = fast_processor(queue.clone(), make_router(provider.clone()));

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        let id = queue
            .enqueue(
                BatchRequest::new("sess", "too late")
                    .with_expires_at(Utc::now() - chrono::Duration::seconds(1))
                    .with_callback(Arc::new(move |req| {
                        assert_eq!(req.status, BatchStatus::Expired);
                        fired_in_cb.fetch_add(1, Ordering::SeqCst);
                    })),
            )
            .unwrap();

        processor.start();
        let queue_for_wait = queue.clone();
        let id_for_wait = id.clone();
        wait_for(move || queue_for_wait.status(&id_for_wait).unwrap() == BatchStatus::Expired).await;
        processor.stop().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn priority_order_respected_across_ticks() {
        let provider = EchoProvider::new();
        let queue = Arc::new(BatchQueue::unbounded());
        let router = make_router(provider);
        let processor = fast_processor(queue.clone(), router);

        let order = Arc::new(Mutex::new(Vec::<String>::new()));
        for (message, priority) in [
            ("low", BatchPriority::Low),
            ("normal", BatchPriority::Normal),
            ("urgent", BatchPriority::Urgent),
            ("high", BatchPriority::High),
        ] {
            let order = order.clone();
            queue
                .enqueue(
                    BatchRequest::new("sess", message)
                        .with_priority(priority)
                        .with_callback(Arc::new(move |req| {
                            order.lock().unwrap().push(req.message.clone());
                        })),
                )
                .unwrap();
        }

        processor.start();
        let order_for_wait = order.clone();
        wait_for(move || order_for_wait.lock().unwrap().len() == 4).await;
        processor.stop().await;

        assert_eq!(
            *order.lock().unwrap(),
            vec!["urgent", "high", "normal", "low"]
        );
    }
}

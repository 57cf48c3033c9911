//! Batch queue and processor integration.
//!
//! Exercises the deferred-execution path end to end: priority plus FIFO
//! ordering through the processor, drain-on-stop semantics, and the
//! terminal-status guarantees callers rely on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use manifold_core::batch::{
    BatchPriority, BatchProcessor, BatchQueue, BatchRequest, BatchStatus, QueueError,
};
use manifold_core::orchestrator::SmartRouter;
use manifold_core::usage::UsageTracker;
use manifold_llm::{ChatRequest, ChatResponse, Provider, Result, Usage};
use manifold_types::RouterConfig;

struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ChatResponse {
            content: format!("echo: {last}"),
            tool_calls: Vec::new(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}

fn make_router() -> Arc<SmartRouter> {
    Arc::new(SmartRouter::new(
        Arc::new(EchoProvider),
        Arc::new(UsageTracker::default()),
        RouterConfig::default(),
    ))
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within budget");
}

/// Scenario 5: enqueue {low, normal, urgent, high}; completion order is
/// urgent, high, normal, low, with FIFO inside equal priorities.
#[tokio::test]
async fn priority_then_fifo_order() {
    let queue = Arc::new(BatchQueue::unbounded());
    let order = Arc::new(Mutex::new(Vec::<String>::new()));

    for (message, priority) in [
        ("low", BatchPriority::Low),
        ("normal-1", BatchPriority::Normal),
        ("urgent", BatchPriority::Urgent),
        ("high", BatchPriority::High),
        ("normal-2", BatchPriority::Normal),
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

    let processor = BatchProcessor::new(queue.clone(), make_router())
        .with_poll_interval(Duration::from_millis(10));
    processor.start();
    let order_for_wait = order.clone();
    wait_for(move || order_for_wait.lock().unwrap().len() == 5).await;
    processor.stop().await;

    assert_eq!(
        *order.lock().unwrap(),
        vec!["urgent", "high", "normal-1", "normal-2", "low"]
    );
}

/// Completed tickets carry the router's response and survive as terminal
/// records until cleanup.
#[tokio::test]
async fn completed_ticket_carries_response() {
    let queue = Arc::new(BatchQueue::unbounded());
    let id = queue
        .enqueue(BatchRequest::new("sess", "ping"))
        .unwrap();

    let processor = BatchProcessor::new(queue.clone(), make_router())
        .with_poll_interval(Duration::from_millis(10));
    processor.start();
    let queue_for_wait = queue.clone();
    let id_for_wait = id.clone();
    wait_for(move || queue_for_wait.status(&id_for_wait).unwrap() == BatchStatus::Completed).await;
    processor.stop().await;

    let detail = queue.status_detail(&id).unwrap();
    assert_eq!(detail.result.as_deref(), Some("echo: ping"));
    assert!(detail.error.is_none());

    // Terminal records survive until cleanup removes them.
    assert_eq!(queue.len(), 1);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(queue.cleanup(Duration::ZERO), 1);
    assert!(queue.is_empty());
}

/// Stop with work still queued: every pending ticket is cancelled with the
/// processor-stopped error and its callback runs exactly once.
#[tokio::test]
async fn stop_cancels_pending_work() {
    let queue = Arc::new(BatchQueue::unbounded());
    let fired = Arc::new(AtomicUsize::new(0));

    for i in 0..4 {
        let fired = fired.clone();
        queue
            .enqueue(
                BatchRequest::new("sess", format!("r{i}")).with_callback(Arc::new(move |req| {
                    assert_eq!(req.status, BatchStatus::Cancelled);
                    assert_eq!(
                        req.error.as_deref(),
                        Some(QueueError::ProcessorStopped.to_string().as_str())
                    );
                    fired.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
    }

    // Gate closed: ticks never dequeue, so stop() finds everything pending.
    let processor = BatchProcessor::new(queue.clone(), make_router())
        .with_poll_interval(Duration::from_millis(10))
        .with_capacity_checker(Arc::new(|| false));
    processor.start();
    tokio::time::sleep(Duration::from_millis(30)).await;
    processor.stop().await;

    assert_eq!(fired.load(Ordering::SeqCst), 4);
    assert_eq!(queue.pending_count(), 0);
    for entry in queue.snapshot() {
        assert_eq!(entry.status, BatchStatus::Cancelled);
    }
}

/// Cancellation before processing wins; the ticket never reaches the
/// provider and later cancels report the right sentinel.
#[tokio::test]
async fn cancelled_ticket_never_processes() {
    let queue = Arc::new(BatchQueue::unbounded());
    let id = queue.enqueue(BatchRequest::new("sess", "never")).unwrap();
    queue.cancel(&id).unwrap();

    let processor = BatchProcessor::new(queue.clone(), make_router())
        .with_poll_interval(Duration::from_millis(10));
    processor.start();
    tokio::time::sleep(Duration::from_millis(40)).await;
    processor.stop().await;

    assert_eq!(queue.status(&id).unwrap(), BatchStatus::Cancelled);
    assert_eq!(
        queue.cancel(&id).unwrap_err(),
        QueueError::AlreadyCancelled(id)
    );
}

/// Concurrency above one drains a burst within a few ticks.
#[tokio::test]
async fn concurrent_workers_drain_burst() {
    let queue = Arc::new(BatchQueue::unbounded());
    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..6 {
        let done = done.clone();
        queue
            .enqueue(
                BatchRequest::new("sess", format!("burst {i}")).with_callback(Arc::new(
                    move |req| {
                        assert_eq!(req.status, BatchStatus::Completed);
                        done.fetch_add(1, Ordering::SeqCst);
                    },
                )),
            )
            .unwrap();
    }

    let processor = BatchProcessor::new(queue.clone(), make_router())
        .with_poll_interval(Duration::from_millis(10))
        .with_max_concurrent(3);
    processor.start();
    let done_for_wait = done.clone();
    wait_for(move || done_for_wait.load(Ordering::SeqCst) == 6).await;
    processor.stop().await;
}

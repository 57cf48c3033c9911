//! Deferred execution: a priority batch queue and its background processor.
//!
//! When the gateway is over capacity (budget exhausted, provider
//! rate-limited), requests can be parked in the [`BatchQueue`] instead of
//! failing. The [`BatchProcessor`] drains the queue in the background at a
//! fixed poll interval, bounded by a concurrency limit, and reports each
//! ticket's outcome through its callback exactly once.

pub mod processor;
pub mod queue;

pub use processor::BatchProcessor;
pub use queue::{
    BatchCallback, BatchPriority, BatchQueue, BatchRequest, BatchStatus, BatchStatusDetail,
    QueueError,
};

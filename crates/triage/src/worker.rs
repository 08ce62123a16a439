//! Allocation worker: drains the admission queue into store transactions.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::admission::AdmissionQueue;
use crate::allocator::TransactionalAllocator;
use crate::completion::CompletionBroker;
use crate::request::AllocationRequest;

pub struct AllocationWorker {
    id: usize,
    queue: Arc<AdmissionQueue>,
    broker: Arc<CompletionBroker>,
    allocator: Arc<TransactionalAllocator>,
}

impl AllocationWorker {
    pub fn new(
        id: usize,
        queue: Arc<AdmissionQueue>,
        broker: Arc<CompletionBroker>,
        allocator: Arc<TransactionalAllocator>,
    ) -> Self {
        Self {
            id,
            queue,
            broker,
            allocator,
        }
    }

    /// Run on the current runtime until the queue is closed and drained or
    /// `shutdown` fires while idle.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let span = tracing::info_span!("allocation_worker", worker = self.id);
        tokio::spawn(self.run(shutdown).instrument(span))
    }

    async fn run(self, shutdown: CancellationToken) {
        tracing::debug!("Worker started");
        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!("Worker cancelled while idle");
                    break;
                }
                next = self.queue.pop() => match next {
                    Some(request) => request,
                    None => break,
                },
            };
            // Once dequeued, a request always runs to a published outcome.
            self.process(request).await;
        }
        tracing::debug!("Worker stopped");
    }

    async fn process(&self, request: AllocationRequest) {
        let AllocationRequest {
            token,
            report_id,
            hospital_id,
            priority,
            ..
        } = request;

        let result = self
            .allocator
            .allocate_committed(report_id, hospital_id)
            .await;

        match &result {
            Ok(allocated) => tracing::info!(
                %token,
                report_id,
                hospital_id,
                priority,
                available_beds = allocated.hospital.available_beds,
                "Bed allocated"
            ),
            Err(e) => tracing::warn!(
                %token,
                report_id,
                hospital_id,
                priority,
                kind = %e.kind(),
                error = %e,
                "Allocation rejected"
            ),
        }

        self.broker.publish(token, result);
    }
}

/// Spawn `count` workers sharing one queue.
pub fn spawn_workers(
    count: usize,
    queue: &Arc<AdmissionQueue>,
    broker: &Arc<CompletionBroker>,
    allocator: &Arc<TransactionalAllocator>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|id| {
            AllocationWorker::new(
                id,
                Arc::clone(queue),
                Arc::clone(broker),
                Arc::clone(allocator),
            )
            .spawn(shutdown.clone())
        })
        .collect()
}

//! Priority-ordered admission queue.
//!
//! Orders allocation intents only; mutation ordering is left to the store's
//! transaction isolation. Lower priority numbers leave first, ties leave in
//! submission order. There is no preemption of requests already taken by a
//! worker.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;

use crate::error::AllocationError;
use crate::request::{AllocationRequest, RequestToken};
use crate::store::{HospitalId, ReportId};

#[derive(Debug)]
struct QueuedRequest {
    request: AllocationRequest,
    sequence: u64,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request.priority == other.request.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    // BinaryHeap pops the greatest element: invert both keys.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .request
            .priority
            .cmp(&self.request.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueuedRequest>,
    next_sequence: u64,
    closed: bool,
}

/// Read-only view of a waiting request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedEntry {
    pub position: usize,
    pub token: RequestToken,
    pub report_id: ReportId,
    pub hospital_id: HospitalId,
    pub priority: u32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct AdmissionQueue {
    state: StdMutex<QueueState>,
    available: Notify,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a request. Visible to [`AdmissionQueue::pop`] once this returns.
    pub fn push(&self, request: AllocationRequest) -> Result<(), AllocationError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(AllocationError::ShuttingDown);
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            tracing::debug!(
                token = %request.token,
                report_id = request.report_id,
                hospital_id = request.hospital_id,
                priority = request.priority,
                depth = state.heap.len() + 1,
                "Request queued"
            );
            state.heap.push(QueuedRequest { request, sequence });
        }
        self.available.notify_one();
        Ok(())
    }

    /// Take the most urgent request without waiting.
    pub fn try_pop(&self) -> Option<AllocationRequest> {
        self.lock().heap.pop().map(|q| q.request)
    }

    /// Wait for the most urgent request. Returns `None` once the queue is
    /// closed and empty.
    pub async fn pop(&self) -> Option<AllocationRequest> {
        loop {
            // Register interest before checking so a close() in between is seen.
            let notified = self.available.notified();
            {
                let mut state = self.lock();
                if let Some(queued) = state.heap.pop() {
                    return Some(queued.request);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Refuse new requests and wake every waiting worker. Requests already
    /// queued can still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Remove everything still waiting, most urgent first.
    pub fn drain(&self) -> Vec<AllocationRequest> {
        let mut state = self.lock();
        let mut drained = Vec::with_capacity(state.heap.len());
        while let Some(queued) = state.heap.pop() {
            drained.push(queued.request);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waiting requests in dequeue order.
    pub fn snapshot(&self) -> Vec<QueuedEntry> {
        let state = self.lock();
        let mut ordered: Vec<&QueuedRequest> = state.heap.iter().collect();
        ordered.sort_by(|a, b| b.cmp(a));
        ordered
            .into_iter()
            .enumerate()
            .map(|(position, q)| QueuedEntry {
                position,
                token: q.request.token,
                report_id: q.request.report_id,
                hospital_id: q.request.hospital_id,
                priority: q.request.priority,
                submitted_at: q.request.submitted_at,
            })
            .collect()
    }
}

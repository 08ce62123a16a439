//! AdmissionService: transport-agnostic admission lifecycle.
//!
//! This service owns:
//! - The admission queue and the workers draining it
//! - The completion broker that answers waiting submitters
//! - Health tracking and shutdown coordination
//!
//! Transports (HTTP, tests, embedding applications) delegate to this service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionQueue, QueuedEntry};
use crate::allocator::TransactionalAllocator;
use crate::completion::{Admission, CompletionBroker, CompletionHandle};
use crate::config::EngineConfig;
use crate::error::AllocationError;
use crate::health::Health;
use crate::request::{AllocationRequest, RequestToken};
use crate::store::{EntityKind, HospitalId, ReportId, ReportView, ResourceStore};
use crate::version::VersionInfo;
use crate::worker::spawn_workers;

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub state: Health,
    pub queue_depth: usize,
    pub pending_waiters: usize,
    pub workers: usize,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == Health::Ready
    }
}

/// A queued request plus the handle its outcome arrives on.
pub struct Submission {
    pub token: RequestToken,
    pub report_id: ReportId,
    pub hospital_id: HospitalId,
    pub priority: u32,
    handle: CompletionHandle,
}

impl Submission {
    pub fn handle(&self) -> &CompletionHandle {
        &self.handle
    }
}

pub struct AdmissionService {
    store: Arc<dyn ResourceStore>,
    allocator: Arc<TransactionalAllocator>,
    queue: Arc<AdmissionQueue>,
    broker: Arc<CompletionBroker>,
    config: EngineConfig,

    health: RwLock<Health>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_shutdown: CancellationToken,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl AdmissionService {
    /// Create the service. Workers are not running until [`Self::start`];
    /// submissions made before then stay queued.
    pub fn new(store: Arc<dyn ResourceStore>, config: EngineConfig) -> Self {
        let allocator = TransactionalAllocator::new(Arc::clone(&store))
            .with_allocate_isolation(config.allocate_isolation);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let version = VersionInfo::new().with_store(store.backend_name());
        Self {
            store,
            allocator: Arc::new(allocator),
            queue: Arc::new(AdmissionQueue::new()),
            broker: CompletionBroker::new(),
            config,
            health: RwLock::new(Health::Starting),
            workers: Mutex::new(Vec::new()),
            worker_shutdown: CancellationToken::new(),
            shutdown_tx,
            shutdown_rx,
            version,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<CompletionBroker> {
        &self.broker
    }

    /// Spawn the allocation workers and mark the service ready.
    pub async fn start(&self) {
        let mut health = self.health.write().await;
        if *health != Health::Starting {
            tracing::warn!(state = ?*health, "start() called twice, ignoring");
            return;
        }
        let handles = spawn_workers(
            self.config.workers,
            &self.queue,
            &self.broker,
            &self.allocator,
            &self.worker_shutdown,
        );
        tracing::info!(
            workers = handles.len(),
            wait_timeout = ?self.config.wait_timeout,
            isolation = %self.allocator.allocate_isolation(),
            backend = self.store.backend_name(),
            "Admission service ready"
        );
        *self.workers.lock().await = handles;
        *health = Health::Ready;
    }

    pub async fn health(&self) -> HealthSnapshot {
        let state = *self.health.read().await;
        let workers = self
            .workers
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .count();
        HealthSnapshot {
            state,
            queue_depth: self.queue.len(),
            pending_waiters: self.broker.pending(),
            workers,
            version: self.version.clone(),
        }
    }

    /// Waiting requests in the order workers will take them.
    pub fn queue_snapshot(&self) -> Vec<QueuedEntry> {
        self.queue.snapshot()
    }

    /// Validate and enqueue an allocation request.
    ///
    /// Hospital and report must exist. Priority comes from the report's
    /// current severity and age range. The waiter is registered before the
    /// request becomes visible to workers.
    pub async fn submit_allocation(
        &self,
        report_id: ReportId,
        hospital_id: HospitalId,
    ) -> Result<Submission, AllocationError> {
        if !self.health.read().await.accepts_submissions() {
            return Err(AllocationError::ShuttingDown);
        }

        self.store
            .find_hospital(hospital_id)
            .await?
            .ok_or_else(|| AllocationError::not_found(EntityKind::Hospital, hospital_id))?;
        let report = self
            .store
            .find_report(report_id)
            .await?
            .ok_or_else(|| AllocationError::not_found(EntityKind::Report, report_id))?;

        let request = AllocationRequest::for_report(&report, hospital_id);
        let token = request.token;
        let priority = request.priority;
        let handle = self.broker.register(token);
        // On refusal the handle drops here and deregisters itself.
        self.queue.push(request)?;

        Ok(Submission {
            token,
            report_id,
            hospital_id,
            priority,
            handle,
        })
    }

    /// Wait for a submission's outcome, up to `timeout` or the configured
    /// wait. Running out of time yields [`Admission::Retry`].
    pub async fn await_outcome(
        &self,
        submission: Submission,
        timeout: Option<Duration>,
    ) -> Result<Admission, AllocationError> {
        let timeout = timeout.unwrap_or(self.config.wait_timeout);
        let Submission {
            token,
            report_id,
            hospital_id,
            handle,
            ..
        } = submission;
        let outcome = handle.wait(timeout).await;
        if let Ok(Admission::Retry) = outcome {
            tracing::info!(%token, report_id, hospital_id, "Requester asked to retry");
        }
        outcome
    }

    /// Submit and wait with the configured bounded wait.
    pub async fn request_allocation(
        &self,
        report_id: ReportId,
        hospital_id: HospitalId,
    ) -> Result<Admission, AllocationError> {
        let submission = self.submit_allocation(report_id, hospital_id).await?;
        self.await_outcome(submission, None).await
    }

    /// Allocate in the caller's task, bypassing the queue.
    pub async fn allocate(
        &self,
        report_id: ReportId,
        hospital_id: HospitalId,
    ) -> Result<Admission, AllocationError> {
        if !self.health.read().await.accepts_submissions() {
            return Err(AllocationError::ShuttingDown);
        }
        let allocated = self
            .allocator
            .allocate_committed(report_id, hospital_id)
            .await?;
        tracing::info!(
            report_id,
            hospital_id,
            available_beds = allocated.hospital.available_beds,
            "Bed allocated directly"
        );
        Ok(Admission::Admitted(allocated))
    }

    /// Undo a committed allocation. Independent of anything still queued
    /// for the same report.
    pub async fn withdraw(&self, report_id: ReportId) -> Result<ReportView, AllocationError> {
        let view = self.allocator.withdraw_committed(report_id).await?;
        tracing::info!(report_id, "Allocation withdrawn");
        Ok(view)
    }

    /// Stop accepting work, let workers finish what is queued, then stop them.
    ///
    /// Requests still queued after `drain_timeout` are answered with
    /// [`AllocationError::ShuttingDown`]. In-flight transactions always run
    /// to completion.
    pub async fn shutdown(&self) {
        {
            let mut health = self.health.write().await;
            if matches!(*health, Health::Draining | Health::Stopped) {
                return;
            }
            *health = Health::Draining;
        }
        tracing::info!(queued = self.queue.len(), "Draining admission queue");
        self.queue.close();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        let mut joined = std::pin::pin!(futures::future::join_all(handles));
        let results = match tokio::time::timeout(self.config.drain_timeout, joined.as_mut()).await {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!(
                    remaining = self.queue.len(),
                    "Drain timeout reached, stopping workers after current request"
                );
                self.worker_shutdown.cancel();
                joined.await
            }
        };
        for result in results {
            if let Err(e) = result {
                tracing::error!(error = %e, "Allocation worker panicked");
            }
        }

        let leftover = self.queue.drain();
        if !leftover.is_empty() {
            tracing::warn!(count = leftover.len(), "Rejecting requests left in queue");
        }
        for request in leftover {
            self.broker
                .publish(request.token, Err(AllocationError::ShuttingDown));
        }

        *self.health.write().await = Health::Stopped;
        tracing::info!("Admission service stopped");
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

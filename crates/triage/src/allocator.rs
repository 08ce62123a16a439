//! Transactional allocate / withdraw.
//!
//! Every mutation runs inside one store transaction: the checks and the writes
//! commit together or not at all. A failure after `begin_transaction` rolls
//! back before the error is returned.

use std::sync::Arc;

use async_trait::async_trait;

use crate::completion::{Admission, Allocated, AllocationResult};
use crate::error::AllocationError;
use crate::service::AdmissionService;
use crate::store::{
    EntityKind, HospitalId, IsolationLevel, ReportId, ReportView, ResourceStore, StoreTransaction,
};

/// Allocation strategy seen by callers.
#[async_trait]
pub trait Allocator: Send + Sync {
    async fn allocate(
        &self,
        report_id: ReportId,
        hospital_id: HospitalId,
    ) -> Result<Admission, AllocationError>;

    async fn withdraw(&self, report_id: ReportId) -> Result<ReportView, AllocationError>;
}

/// Runs allocations directly against the store, in the caller's task.
pub struct TransactionalAllocator {
    store: Arc<dyn ResourceStore>,
    allocate_isolation: IsolationLevel,
}

impl TransactionalAllocator {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            allocate_isolation: IsolationLevel::ReadCommitted,
        }
    }

    /// Raise the isolation used by allocate. Never goes below read-committed.
    pub fn with_allocate_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.allocate_isolation = isolation.max(IsolationLevel::ReadCommitted);
        self
    }

    pub fn allocate_isolation(&self) -> IsolationLevel {
        self.allocate_isolation
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Allocate one bed at `hospital_id` to `report_id` and commit.
    pub async fn allocate_committed(
        &self,
        report_id: ReportId,
        hospital_id: HospitalId,
    ) -> AllocationResult {
        let mut tx = self.store.begin_transaction(self.allocate_isolation).await?;
        let result = allocate_in(tx.as_mut(), report_id, hospital_id).await;
        finish_transaction(tx, result).await
    }

    /// Return the bed held by `report_id` and reset the report to unsent.
    pub async fn withdraw_committed(
        &self,
        report_id: ReportId,
    ) -> Result<ReportView, AllocationError> {
        let mut tx = self
            .store
            .begin_transaction(IsolationLevel::Serializable)
            .await?;
        let result = withdraw_in(tx.as_mut(), report_id).await;
        finish_transaction(tx, result).await
    }
}

#[async_trait]
impl Allocator for TransactionalAllocator {
    async fn allocate(
        &self,
        report_id: ReportId,
        hospital_id: HospitalId,
    ) -> Result<Admission, AllocationError> {
        self.allocate_committed(report_id, hospital_id)
            .await
            .map(Admission::Admitted)
    }

    async fn withdraw(&self, report_id: ReportId) -> Result<ReportView, AllocationError> {
        self.withdraw_committed(report_id).await
    }
}

/// Routes allocations through the admission queue and waits for the outcome.
pub struct QueuedAllocator {
    service: Arc<AdmissionService>,
}

impl QueuedAllocator {
    pub fn new(service: Arc<AdmissionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Allocator for QueuedAllocator {
    async fn allocate(
        &self,
        report_id: ReportId,
        hospital_id: HospitalId,
    ) -> Result<Admission, AllocationError> {
        self.service.request_allocation(report_id, hospital_id).await
    }

    async fn withdraw(&self, report_id: ReportId) -> Result<ReportView, AllocationError> {
        self.service.withdraw(report_id).await
    }
}

async fn allocate_in(
    tx: &mut dyn StoreTransaction,
    report_id: ReportId,
    hospital_id: HospitalId,
) -> AllocationResult {
    let hospital = tx
        .find_hospital(hospital_id)
        .await?
        .ok_or_else(|| AllocationError::not_found(EntityKind::Hospital, hospital_id))?;
    if hospital.available_beds == 0 {
        return Err(AllocationError::ResourceExhausted { hospital_id });
    }

    let report = tx
        .find_report(report_id)
        .await?
        .ok_or_else(|| AllocationError::not_found(EntityKind::Report, report_id))?;
    if report.is_sent {
        return Err(AllocationError::AlreadyAllocated { report_id });
    }

    let hospital = tx.update_available_beds(hospital_id, -1).await?;
    let report = tx
        .set_report_sent(report_id, Some(hospital_id), true)
        .await?;
    Ok(Allocated { report, hospital })
}

async fn withdraw_in(
    tx: &mut dyn StoreTransaction,
    report_id: ReportId,
) -> Result<ReportView, AllocationError> {
    let report = tx
        .find_report(report_id)
        .await?
        .ok_or_else(|| AllocationError::not_found(EntityKind::Report, report_id))?;
    if !report.is_sent {
        return Err(AllocationError::invalid_state(report_id, "nothing to withdraw"));
    }
    let Some(hospital_id) = report.hospital_id else {
        return Err(AllocationError::invalid_state(
            report_id,
            "sent without a target hospital",
        ));
    };

    tx.set_report_sent(report_id, None, false).await?;
    tx.update_available_beds(hospital_id, 1).await?;
    tx.report_view(report_id)
        .await?
        .ok_or_else(|| AllocationError::not_found(EntityKind::Report, report_id))
}

/// Commit on success, roll back on failure.
async fn finish_transaction<T>(
    tx: Box<dyn StoreTransaction>,
    result: Result<T, AllocationError>,
) -> Result<T, AllocationError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::priority::AgeRange;
    use crate::severity::SymptomLevel;
    use crate::store::{Hospital, InMemoryStore, Report, StoreError};

    fn level(n: u8) -> SymptomLevel {
        SymptomLevel::new(n).unwrap()
    }

    fn setup(beds: u32) -> (Arc<InMemoryStore>, TransactionalAllocator) {
        let store = Arc::new(InMemoryStore::new());
        store.insert_hospital(Hospital::new(1, "한강병원", 3).with_available_beds(beds));
        store.insert_report(Report::new(10, level(2)).with_age_range(AgeRange::Adult));
        store.insert_report(Report::new(11, level(4)));
        let allocator = TransactionalAllocator::new(store.clone());
        (store, allocator)
    }

    #[tokio::test]
    async fn allocate_decrements_and_marks_sent() {
        let (store, allocator) = setup(2);
        let allocated = allocator.allocate_committed(10, 1).await.unwrap();

        assert_eq!(allocated.hospital.available_beds, 1);
        assert!(allocated.report.is_sent);
        assert_eq!(allocated.report.hospital_id, Some(1));
        assert_eq!(store.hospital(1).unwrap().available_beds, 1);
        assert!(store.report(10).unwrap().is_sent);
    }

    #[tokio::test]
    async fn zero_beds_is_exhausted_and_nothing_changes() {
        let (store, allocator) = setup(0);
        let err = allocator.allocate_committed(10, 1).await.unwrap_err();

        assert!(matches!(err, AllocationError::ResourceExhausted { hospital_id: 1 }));
        assert_eq!(store.hospital(1).unwrap().available_beds, 0);
        assert!(!store.report(10).unwrap().is_sent);
    }

    #[tokio::test]
    async fn already_sent_report_is_rejected() {
        let (store, allocator) = setup(2);
        allocator.allocate_committed(10, 1).await.unwrap();

        let err = allocator.allocate_committed(10, 1).await.unwrap_err();
        assert!(matches!(err, AllocationError::AlreadyAllocated { report_id: 10 }));
        assert_eq!(store.hospital(1).unwrap().available_beds, 1);
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let (store, allocator) = setup(2);

        let err = allocator.allocate_committed(10, 99).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::NotFound {
                entity: EntityKind::Hospital,
                id: 99
            }
        ));

        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
        assert!(!store.report(10).unwrap().is_sent);
        assert_eq!(store.report(10).unwrap().hospital_id, None);

        let err = allocator.allocate_committed(99, 1).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::NotFound {
                entity: EntityKind::Report,
                id: 99
            }
        ));
        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
    }

    #[tokio::test]
    async fn withdraw_of_missing_report_is_not_found() {
        let (store, allocator) = setup(2);
        let err = allocator.withdraw_committed(99).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::NotFound {
                entity: EntityKind::Report,
                id: 99
            }
        ));
        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
    }

    #[tokio::test]
    async fn withdraw_commit_failure_keeps_allocation() {
        let (store, allocator) = setup(2);
        allocator.allocate_committed(11, 1).await.unwrap();
        store.fail_next_commit();

        let err = allocator.withdraw_committed(11).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::TransactionFailed(StoreError::Transaction { .. })
        ));
        assert_eq!(store.hospital(1).unwrap().available_beds, 1);
        let report = store.report(11).unwrap();
        assert!(report.is_sent);
        assert_eq!(report.hospital_id, Some(1));

        // The allocation is still withdrawable afterwards
        allocator.withdraw_committed(11).await.unwrap();
        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
    }

    /// Admit, reject the duplicate, then withdraw, through the trait object.
    async fn admit_reject_withdraw(allocator: Arc<dyn Allocator>, store: &InMemoryStore) {
        let admission = allocator.allocate(10, 1).await.unwrap();
        assert!(admission.is_admitted());
        assert_eq!(admission.allocated().unwrap().report.hospital_id, Some(1));
        assert_eq!(store.hospital(1).unwrap().available_beds, 1);

        let duplicate = allocator.allocate(10, 1).await;
        assert!(matches!(
            duplicate,
            Err(AllocationError::AlreadyAllocated { report_id: 10 })
        ));
        assert_eq!(store.hospital(1).unwrap().available_beds, 1);

        let view = allocator.withdraw(10).await.unwrap();
        assert!(!view.report.is_sent);
        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
    }

    #[tokio::test]
    async fn transactional_strategy_behind_trait_object() {
        let (store, allocator) = setup(2);
        admit_reject_withdraw(Arc::new(allocator), &store).await;
    }

    #[tokio::test]
    async fn queued_strategy_behind_trait_object() {
        let (store, _) = setup(2);
        let service = Arc::new(AdmissionService::new(
            store.clone(),
            EngineConfig::default().with_workers(1),
        ));
        service.start().await;

        admit_reject_withdraw(Arc::new(QueuedAllocator::new(Arc::clone(&service))), &store).await;

        service.shutdown().await;
    }

    #[tokio::test]
    async fn withdraw_restores_bed_count() {
        let (store, allocator) = setup(2);
        allocator.allocate_committed(11, 1).await.unwrap();
        assert_eq!(store.hospital(1).unwrap().available_beds, 1);

        let view = allocator.withdraw_committed(11).await.unwrap();
        assert!(!view.report.is_sent);
        assert_eq!(view.report.hospital_id, None);
        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
    }

    #[tokio::test]
    async fn withdraw_of_unsent_report_is_invalid() {
        let (store, allocator) = setup(2);
        let err = allocator.withdraw_committed(10).await.unwrap_err();
        assert!(matches!(err, AllocationError::InvalidState { report_id: 10, .. }));
        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
    }

    #[tokio::test]
    async fn commit_failure_is_transaction_failed_and_rolled_back() {
        let (store, allocator) = setup(2);
        store.fail_next_commit();

        let err = allocator.allocate_committed(10, 1).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            AllocationError::TransactionFailed(StoreError::Transaction { .. })
        ));
        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
        assert!(!store.report(10).unwrap().is_sent);
    }

    #[tokio::test]
    async fn allocate_isolation_is_clamped() {
        let (_store, allocator) = setup(1);
        let allocator = allocator.with_allocate_isolation(IsolationLevel::ReadUncommitted);
        assert_eq!(allocator.allocate_isolation(), IsolationLevel::ReadCommitted);
        assert!(allocator.allocate(10, 1).await.unwrap().is_admitted());
    }
}

//! In-memory resource store.
//!
//! Transactions take a single writer lock for their whole lifetime and stage
//! writes in a private copy of the tables, publishing it on commit. That
//! makes every supported isolation level behave as serializable.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    EntityKind, Hospital, HospitalId, IsolationLevel, Patient, PatientId, Report, ReportId,
    ReportView, ResourceStore, StoreError, StoreTransaction,
};
use crate::priority::{AgeRange, deserialize_lenient};
use crate::severity::{SeverityScorer, SymptomLevel, deserialize_symptoms};

#[derive(Debug, Clone, Default)]
struct Tables {
    hospitals: HashMap<HospitalId, Hospital>,
    reports: HashMap<ReportId, Report>,
    patients: HashMap<PatientId, Patient>,
}

impl Tables {
    fn report_view(&self, id: ReportId) -> Option<ReportView> {
        let report = self.reports.get(&id)?.clone();
        let patient = report
            .patient_id
            .and_then(|pid| self.patients.get(&pid).cloned());
        Some(ReportView { report, patient })
    }

    /// Checks the bed invariants a seed must satisfy before it is served.
    fn validate(&self) -> Result<(), StoreError> {
        let mut sent_per_hospital: HashMap<HospitalId, u32> = HashMap::new();
        for report in self.reports.values() {
            match (report.is_sent, report.hospital_id) {
                (true, Some(hospital_id)) => {
                    if !self.hospitals.contains_key(&hospital_id) {
                        return Err(StoreError::not_found(EntityKind::Hospital, hospital_id));
                    }
                    *sent_per_hospital.entry(hospital_id).or_default() += 1;
                }
                (false, None) => {}
                (sent, _) => {
                    return Err(StoreError::constraint(format!(
                        "report {}: sent={sent} requires a matching target hospital",
                        report.report_id
                    )));
                }
            }
        }

        for hospital in self.hospitals.values() {
            if hospital.available_beds > hospital.capacity {
                return Err(StoreError::constraint(format!(
                    "hospital {}: available beds {} exceed capacity {}",
                    hospital.hospital_id, hospital.available_beds, hospital.capacity
                )));
            }
            let occupied = hospital.capacity - hospital.available_beds;
            let sent = sent_per_hospital
                .get(&hospital.hospital_id)
                .copied()
                .unwrap_or(0);
            if sent > occupied {
                return Err(StoreError::constraint(format!(
                    "hospital {}: {sent} sent reports but only {occupied} occupied beds",
                    hospital.hospital_id
                )));
            }
        }
        Ok(())
    }
}

/// Initial records for a store, e.g. loaded from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub hospitals: Vec<Hospital>,
    #[serde(default)]
    pub reports: Vec<SeedReport>,
    #[serde(default)]
    pub patients: Vec<Patient>,
}

/// A report as written in a seed file.
///
/// `symptoms` may be a list or a comma-joined string. The severity level is
/// scored from the symptoms unless `symptom_level` overrides it.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedReport {
    pub report_id: ReportId,
    #[serde(default)]
    pub patient_id: Option<PatientId>,
    #[serde(default, deserialize_with = "deserialize_symptoms")]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub symptom_level: Option<SymptomLevel>,
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub age_range: Option<AgeRange>,
    #[serde(default)]
    pub is_sent: bool,
    #[serde(default)]
    pub hospital_id: Option<HospitalId>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SeedReport {
    fn into_report(self, scorer: &SeverityScorer) -> Report {
        let scored = scorer.level(&self.symptoms);
        let symptom_level = match self.symptom_level {
            Some(level) => {
                if level != scored && !self.symptoms.is_empty() {
                    tracing::debug!(
                        report_id = self.report_id,
                        %level,
                        %scored,
                        "Seeded level overrides scored symptoms"
                    );
                }
                level
            }
            None => scored,
        };
        Report {
            report_id: self.report_id,
            patient_id: self.patient_id,
            symptoms: self.symptoms,
            symptom_level,
            age_range: self.age_range,
            is_sent: self.is_sent,
            hospital_id: self.hospital_id,
            created_at: self.created_at,
        }
    }
}

fn insert_unique<K, V>(
    table: &mut HashMap<K, V>,
    key: K,
    value: V,
    entity: EntityKind,
) -> Result<(), StoreError>
where
    K: std::hash::Hash + Eq + Copy + Into<u64>,
{
    match table.entry(key) {
        Entry::Occupied(_) => Err(StoreError::constraint(format!(
            "duplicate {entity} {}",
            Into::<u64>::into(key)
        ))),
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
    }
}

pub struct InMemoryStore {
    committed: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
    transaction_latency: Option<Duration>,
    fail_next_commit: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_tables(Tables::default())
    }

    fn with_tables(tables: Tables) -> Self {
        Self {
            committed: Arc::new(RwLock::new(tables)),
            writer: Arc::new(Mutex::new(())),
            transaction_latency: None,
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Build a store from seed records, scoring severity with the built-in
    /// symptom table.
    pub fn from_seed(seed: Seed) -> Result<Self, StoreError> {
        Self::from_seed_with(seed, &SeverityScorer::new())
    }

    /// Build a store from seed records.
    ///
    /// Rejects duplicate ids, free beds above capacity, sent reports without
    /// an existing target hospital, and hospitals with more sent reports than
    /// occupied beds.
    pub fn from_seed_with(seed: Seed, scorer: &SeverityScorer) -> Result<Self, StoreError> {
        let mut tables = Tables::default();
        for hospital in seed.hospitals {
            insert_unique(
                &mut tables.hospitals,
                hospital.hospital_id,
                hospital,
                EntityKind::Hospital,
            )?;
        }
        for patient in seed.patients {
            insert_unique(
                &mut tables.patients,
                patient.patient_id,
                patient,
                EntityKind::Patient,
            )?;
        }
        for report in seed.reports {
            let report = report.into_report(scorer);
            insert_unique(
                &mut tables.reports,
                report.report_id,
                report,
                EntityKind::Report,
            )?;
        }
        tables.validate()?;
        Ok(Self::with_tables(tables))
    }

    /// Delay every commit by `latency` (simulates a slow database).
    pub fn with_transaction_latency(mut self, latency: Duration) -> Self {
        self.transaction_latency = Some(latency);
        self
    }

    /// Make the next transaction opened on this store fail at commit.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::Release);
    }

    pub fn insert_hospital(&self, hospital: Hospital) {
        self.write().hospitals.insert(hospital.hospital_id, hospital);
    }

    pub fn insert_report(&self, report: Report) {
        self.write().reports.insert(report.report_id, report);
    }

    pub fn insert_patient(&self, patient: Patient) {
        self.write().patients.insert(patient.patient_id, patient);
    }

    /// Committed state of a hospital.
    pub fn hospital(&self, id: HospitalId) -> Option<Hospital> {
        self.read().hospitals.get(&id).cloned()
    }

    /// Committed state of a report.
    pub fn report(&self, id: ReportId) -> Option<Report> {
        self.read().reports.get(&id).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.committed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.committed.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn find_hospital(&self, id: HospitalId) -> Result<Option<Hospital>, StoreError> {
        Ok(self.hospital(id))
    }

    async fn find_report(&self, id: ReportId) -> Result<Option<Report>, StoreError> {
        Ok(self.report(id))
    }

    async fn report_view(&self, id: ReportId) -> Result<Option<ReportView>, StoreError> {
        Ok(self.read().report_view(id))
    }

    async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn StoreTransaction>, StoreError> {
        if isolation < IsolationLevel::ReadCommitted {
            return Err(StoreError::transaction(format!(
                "{isolation} isolation is not supported"
            )));
        }

        let guard = Arc::clone(&self.writer).lock_owned().await;
        let staged = self.read().clone();
        let fail_commit = self.fail_next_commit.swap(false, Ordering::AcqRel);

        tracing::trace!(%isolation, "Transaction started");
        Ok(Box::new(InMemoryTransaction {
            _guard: guard,
            committed: Arc::clone(&self.committed),
            staged,
            isolation,
            latency: self.transaction_latency,
            fail_commit,
            dirty: false,
            finished: false,
        }))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

struct InMemoryTransaction {
    _guard: OwnedMutexGuard<()>,
    committed: Arc<RwLock<Tables>>,
    staged: Tables,
    isolation: IsolationLevel,
    latency: Option<Duration>,
    fail_commit: bool,
    dirty: bool,
    finished: bool,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn find_hospital(&self, id: HospitalId) -> Result<Option<Hospital>, StoreError> {
        Ok(self.staged.hospitals.get(&id).cloned())
    }

    async fn find_report(&self, id: ReportId) -> Result<Option<Report>, StoreError> {
        Ok(self.staged.reports.get(&id).cloned())
    }

    async fn report_view(&self, id: ReportId) -> Result<Option<ReportView>, StoreError> {
        Ok(self.staged.report_view(id))
    }

    async fn update_available_beds(
        &mut self,
        hospital_id: HospitalId,
        delta: i32,
    ) -> Result<Hospital, StoreError> {
        let hospital = self
            .staged
            .hospitals
            .get_mut(&hospital_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Hospital, hospital_id))?;

        let updated = i64::from(hospital.available_beds) + i64::from(delta);
        if updated < 0 || updated > i64::from(hospital.capacity) {
            return Err(StoreError::constraint(format!(
                "hospital {hospital_id}: available beds {} {delta:+} outside 0..={}",
                hospital.available_beds, hospital.capacity
            )));
        }

        hospital.available_beds = updated as u32;
        self.dirty = true;
        Ok(hospital.clone())
    }

    async fn set_report_sent(
        &mut self,
        report_id: ReportId,
        hospital_id: Option<HospitalId>,
        sent: bool,
    ) -> Result<Report, StoreError> {
        if sent != hospital_id.is_some() {
            return Err(StoreError::constraint(format!(
                "report {report_id}: sent={sent} requires a matching target hospital"
            )));
        }
        if let Some(id) = hospital_id
            && !self.staged.hospitals.contains_key(&id)
        {
            return Err(StoreError::not_found(EntityKind::Hospital, id));
        }

        let report = self
            .staged
            .reports
            .get_mut(&report_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Report, report_id))?;
        report.hospital_id = hospital_id;
        report.is_sent = sent;
        self.dirty = true;
        Ok(report.clone())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.finished = true;
        if self.fail_commit {
            return Err(StoreError::transaction("commit failed"));
        }

        if self.dirty {
            let staged = std::mem::take(&mut self.staged);
            *self.committed.write().unwrap_or_else(PoisonError::into_inner) = staged;
        }
        tracing::trace!(isolation = %self.isolation, "Transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finished = true;
        tracing::trace!(isolation = %self.isolation, "Transaction rolled back");
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished && self.dirty {
            tracing::warn!(
                isolation = %self.isolation,
                "Transaction dropped without commit - discarding staged writes"
            );
        }
    }
}

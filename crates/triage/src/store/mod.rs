//! Resource store interface.
//!
//! The engine never owns hospital, report or patient records. It reads and
//! mutates them through [`ResourceStore`], and every mutation happens inside a
//! [`StoreTransaction`] opened at an explicit [`IsolationLevel`].

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::priority::AgeRange;
use crate::severity::SymptomLevel;

pub use memory::{InMemoryStore, Seed, SeedReport};

pub type HospitalId = u64;
pub type ReportId = u64;
pub type PatientId = u64;

/// Record kinds, used to qualify lookups that came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Hospital,
    Report,
    Patient,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hospital => "hospital",
            Self::Report => "report",
            Self::Patient => "patient",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hospital {
    pub hospital_id: HospitalId,
    pub name: String,
    /// Configured bed total; `available_beds` never exceeds it.
    pub capacity: u32,
    pub available_beds: u32,
}

impl Hospital {
    pub fn new(hospital_id: HospitalId, name: impl Into<String>, capacity: u32) -> Self {
        Self {
            hospital_id,
            name: name.into(),
            capacity,
            available_beds: capacity,
        }
    }

    pub fn with_available_beds(mut self, available_beds: u32) -> Self {
        self.available_beds = available_beds.min(self.capacity);
        self
    }
}

/// A patient's symptom report.
///
/// `is_sent` implies `hospital_id` is set and that hospital's bed count was
/// decremented for this report exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: ReportId,
    #[serde(default)]
    pub patient_id: Option<PatientId>,
    #[serde(default, deserialize_with = "crate::severity::deserialize_symptoms")]
    pub symptoms: Vec<String>,
    pub symptom_level: SymptomLevel,
    #[serde(default, deserialize_with = "crate::priority::deserialize_lenient")]
    pub age_range: Option<AgeRange>,
    #[serde(default)]
    pub is_sent: bool,
    #[serde(default)]
    pub hospital_id: Option<HospitalId>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn new(report_id: ReportId, symptom_level: SymptomLevel) -> Self {
        Self {
            report_id,
            patient_id: None,
            symptoms: Vec::new(),
            symptom_level,
            age_range: None,
            is_sent: false,
            hospital_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_age_range(mut self, age_range: AgeRange) -> Self {
        self.age_range = Some(age_range);
        self
    }

    pub fn with_patient(mut self, patient_id: PatientId) -> Self {
        self.patient_id = Some(patient_id);
        self
    }

    pub fn with_symptoms<I, S>(mut self, symptoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symptoms = symptoms.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the report as already sent to `hospital_id` (seeding only).
    pub fn sent_to(mut self, hospital_id: HospitalId) -> Self {
        self.is_sent = true;
        self.hospital_id = Some(hospital_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
}

/// Report joined with its patient, as returned by a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportView {
    #[serde(flatten)]
    pub report: Report,
    pub patient: Option<Patient>,
}

/// Transaction isolation, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: u64 },

    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("transaction error: {message}")]
    Transaction { message: String },

    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn not_found(entity: EntityKind, id: u64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Read access plus transaction scopes over hospitals and reports.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_hospital(&self, id: HospitalId) -> Result<Option<Hospital>, StoreError>;

    async fn find_report(&self, id: ReportId) -> Result<Option<Report>, StoreError>;

    async fn report_view(&self, id: ReportId) -> Result<Option<ReportView>, StoreError>;

    /// Opens a transaction scope.
    ///
    /// The transaction must be committed or rolled back; dropping it without
    /// commit discards its writes.
    async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// A unit of work against the store. Reads see this transaction's own
/// uncommitted writes.
#[async_trait]
pub trait StoreTransaction: Send {
    fn isolation(&self) -> IsolationLevel;

    async fn find_hospital(&self, id: HospitalId) -> Result<Option<Hospital>, StoreError>;

    async fn find_report(&self, id: ReportId) -> Result<Option<Report>, StoreError>;

    async fn report_view(&self, id: ReportId) -> Result<Option<ReportView>, StoreError>;

    /// Adds `delta` to the hospital's free beds, keeping `0 ≤ beds ≤ capacity`.
    async fn update_available_beds(
        &mut self,
        hospital_id: HospitalId,
        delta: i32,
    ) -> Result<Hospital, StoreError>;

    /// Sets the report's target hospital and sent flag together.
    ///
    /// `sent` must agree with `hospital_id.is_some()`.
    async fn set_report_sent(
        &mut self,
        report_id: ReportId,
        hospital_id: Option<HospitalId>,
        sent: bool,
    ) -> Result<Report, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

//! triage: emergency bed admission and allocation engine.

mod health;
mod version;

pub mod admission;
pub mod allocator;
pub mod completion;
pub mod config;
pub mod error;
pub mod priority;
pub mod request;
pub mod service;
pub mod severity;
pub mod store;
pub mod transport;
pub mod worker;

pub use admission::{AdmissionQueue, QueuedEntry};
pub use allocator::{Allocator, QueuedAllocator, TransactionalAllocator};
pub use completion::{
    Admission, Allocated, AllocationResult, CompletionBroker, CompletionHandle, WaitState,
};
pub use config::{DEFAULT_WAIT_TIMEOUT, EngineConfig};
pub use error::{AllocationError, ErrorKind};
pub use health::Health;
pub use priority::{AgeRange, priority};
pub use request::{AllocationRequest, RequestToken};
pub use service::{AdmissionService, HealthSnapshot, Submission};
pub use severity::{SeverityScorer, SymptomCategory, SymptomLevel};
pub use store::{
    EntityKind, Hospital, HospitalId, InMemoryStore, IsolationLevel, Patient, PatientId, Report,
    ReportId, ReportView, ResourceStore, Seed, SeedReport, StoreError, StoreTransaction,
};
pub use version::{TRIAGE_VERSION, VersionInfo};
pub use worker::AllocationWorker;

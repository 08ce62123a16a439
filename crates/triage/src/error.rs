//! Classified allocation failures.

use serde::Serialize;

use crate::store::{EntityKind, HospitalId, ReportId, StoreError};

/// Every way an admission can fail. A bounded wait running out is not an
/// error; it resolves to [`crate::Admission::Retry`].
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("{entity} {id} does not exist")]
    NotFound { entity: EntityKind, id: u64 },

    #[error("report {report_id} has already been sent to a hospital")]
    AlreadyAllocated { report_id: ReportId },

    #[error("report {report_id}: {reason}")]
    InvalidState { report_id: ReportId, reason: String },

    #[error("hospital {hospital_id} has no available beds, choose another hospital")]
    ResourceExhausted { hospital_id: HospitalId },

    #[error("allocation transaction failed: {0}")]
    TransactionFailed(#[from] StoreError),

    #[error("admission engine is shutting down")]
    ShuttingDown,
}

/// Closed set of failure classes, for status mapping and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyAllocated,
    InvalidState,
    ResourceExhausted,
    TransactionFailed,
    ShuttingDown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyAllocated => "already_allocated",
            Self::InvalidState => "invalid_state",
            Self::ResourceExhausted => "resource_exhausted",
            Self::TransactionFailed => "transaction_failed",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AllocationError {
    pub fn not_found(entity: EntityKind, id: u64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn invalid_state(report_id: ReportId, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            report_id,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyAllocated { .. } => ErrorKind::AlreadyAllocated,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::TransactionFailed(_) => ErrorKind::TransactionFailed,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Whether the same request may succeed if simply tried again.
    ///
    /// Transaction failures are rolled back in full. Business rejections
    /// stay rejected until the underlying state changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionFailed(_))
    }
}

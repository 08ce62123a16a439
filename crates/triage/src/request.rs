//! Allocation request tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{HospitalId, Report, ReportId};

/// Unique handle for one submitted allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(uuid::Uuid);

impl RequestToken {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for RequestToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending bed request. Lives only in the admission queue and is consumed
/// exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRequest {
    pub token: RequestToken,
    pub report_id: ReportId,
    pub hospital_id: HospitalId,
    pub priority: u32,
    pub submitted_at: DateTime<Utc>,
}

impl AllocationRequest {
    pub fn new(report_id: ReportId, hospital_id: HospitalId, priority: u32) -> Self {
        Self {
            token: RequestToken::new(),
            report_id,
            hospital_id,
            priority,
            submitted_at: Utc::now(),
        }
    }

    /// Builds a request with its priority derived from the report's current
    /// severity and age range.
    pub fn for_report(report: &Report, hospital_id: HospitalId) -> Self {
        let priority = crate::priority::priority(report.symptom_level, report.age_range);
        Self::new(report.report_id, hospital_id, priority)
    }
}

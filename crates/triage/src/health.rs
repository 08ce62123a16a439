//! Engine lifecycle states.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Created, workers not yet running
    #[default]
    Starting,
    /// Accepting submissions
    Ready,
    /// Queue closed, workers finishing what was queued
    Draining,
    Stopped,
}

impl Health {
    pub fn accepts_submissions(&self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

//! Version information.

/// Engine version from Cargo.toml
pub const TRIAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub triage: &'static str,
    /// Resource store backend in use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<&'static str>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            triage: TRIAGE_VERSION,
            store: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, backend: &'static str) -> Self {
        self.store = Some(backend);
        self
    }
}

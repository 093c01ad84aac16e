/// Failure reported by a browser API.
///
/// Handlers log these and carry on; they never reach the event loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("injection into tab {tab_id}: {reason}")]
    Injection { tab_id: i32, reason: String },
    #[error("dynamic rules: {0}")]
    Rules(String),
    #[error("tabs: {0}")]
    Tabs(String),
    #[error("unexpected value from host: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> Self {
        HostError::Decode(e.to_string())
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

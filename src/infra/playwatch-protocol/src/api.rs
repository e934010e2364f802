use serde::{Deserialize, Serialize};

/// Outcome of one library synchronization attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    /// Users inserted or updated.
    pub user_count: usize,
    /// Media items inserted or updated.
    pub media_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCreated {
    pub file_name: String,
}

/// Automatic backup file as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupListing {
    pub file_name: String,
    pub size_bytes: u64,
    /// RFC 3339 modification time.
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKilled {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub kind: String,
    pub running: bool,
}

/// Error body returned by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable code, e.g. `session_not_found`.
    pub error: String,
    pub message: String,
}

/// Well-known [`ApiError::error`] codes.
pub mod error_codes {
    pub const UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";
    pub const SESSION_NOT_FOUND: &str = "session_not_found";
    pub const STORE_FAILURE: &str = "store_failure";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const CONCURRENT_RUN_REJECTED: &str = "concurrent_run_rejected";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
}

use serde::{Deserialize, Serialize};

/// One object in the destination listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

/// Stage at which a file transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    #[serde(rename = "fetch_failed")]
    FetchFailed,
    #[serde(rename = "session_create_failed")]
    SessionCreateFailed,
    #[serde(rename = "part_upload_failed")]
    PartUploadFailed,
    #[serde(rename = "commit_failed")]
    CommitFailed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "list_failed")]
    ListFailed,
    #[serde(rename = "internal")]
    Internal,
}

impl FailureKind {
    /// Returns the snake_case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchFailed => "fetch_failed",
            Self::SessionCreateFailed => "session_create_failed",
            Self::PartUploadFailed => "part_upload_failed",
            Self::CommitFailed => "commit_failed",
            Self::Cancelled => "cancelled",
            Self::ListFailed => "list_failed",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic record for one failed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub destination: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub kind: FailureKind,
    pub message: String,
}

use crate::domain::models::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid task data: {0}")]
    Domain(#[from] DomainError),
    #[error("category not found: {0}")]
    CategoryNotFound(String),
    #[error("local mirror sync failed: {0}")]
    SyncFailed(String),
    #[error("expected exactly one time tracker workspace, found {0}; set workspaceId in app.json")]
    AmbiguousWorkspace(usize),
}

impl InfraError {
    pub fn http(status: reqwest::StatusCode, body: &str) -> Self {
        Self::Http {
            status: status.as_u16(),
            body: body.to_string(),
        }
    }
}

//! Backend HTTP API: wire types, error taxonomy and the traits the
//! pollers depend on. `HttpApi` is the reqwest-backed implementation.

mod http;
mod types;

use async_trait::async_trait;

pub use http::HttpApi;
pub use types::{
    AudioFile, CatalogJob, CatalogJobStatus, CatalogSnapshot, ModelEntry, Sample, ServerRecord,
    ServerUpsert, VoiceJob, VoiceJobStatus,
};

/// Everything that can go wrong talking to the backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(String),
    #[error("{detail}")]
    Status { status: u16, detail: String },
    #[error("Unexpected response: {0}")]
    Parse(String),
    #[error("{0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Turn a non-2xx body into a message: JSON `detail` first, then the raw
/// text, then `HTTP <status>`.
pub fn error_detail(status: u16, body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(body) {
        match map.get("detail") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => return s.clone(),
            Some(serde_json::Value::Null) | None => {}
            Some(other) if !other.is_string() => return other.to_string(),
            Some(_) => {}
        }
    }
    let text = body.trim();
    if text.is_empty() {
        format!("HTTP {status}")
    } else {
        text.to_string()
    }
}

/// Model catalog and LLM listing endpoints.
#[async_trait(?Send)]
pub trait CatalogApi {
    async fn catalog(&self) -> Result<CatalogSnapshot, ApiError>;
    async fn install(&self, model: &str) -> Result<(), ApiError>;
    async fn llm_models(&self) -> Result<Vec<String>, ApiError>;
}

/// Remote inference server registry endpoints.
#[async_trait(?Send)]
pub trait ServerApi {
    async fn servers(&self) -> Result<Vec<ServerRecord>, ApiError>;
    async fn upsert_server(&self, server: &ServerUpsert) -> Result<(), ApiError>;
    async fn delete_server(&self, name: &str) -> Result<(), ApiError>;
}

/// Voice sample and training endpoints.
#[async_trait(?Send)]
pub trait VoiceApi {
    async fn samples(&self, project: &str) -> Result<Vec<Sample>, ApiError>;
    async fn upload_samples(&self, project: &str, files: Vec<AudioFile>) -> Result<(), ApiError>;
    async fn delete_sample(&self, project: &str, id: &str) -> Result<(), ApiError>;
    async fn jobs(&self, project: &str, limit: u32) -> Result<Vec<VoiceJob>, ApiError>;
    /// Returns the created job when the backend echoes it.
    async fn train(&self, project: &str) -> Result<Option<VoiceJob>, ApiError>;
}

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Status of a model install job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum CatalogJobStatus {
    Pending,
    Running,
    Success,
    Error,
    Unknown,
}

impl CatalogJobStatus {
    /// Whether the backend is still working on the job.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for CatalogJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Unknown => "unknown",
        })
    }
}

impl From<String> for CatalogJobStatus {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "success" => Self::Success,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Status of a voice training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum VoiceJobStatus {
    Queued,
    Preparing,
    Training,
    Validating,
    Done,
    Failed,
    Unknown,
}

impl VoiceJobStatus {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Preparing | Self::Training | Self::Validating
        )
    }
}

impl fmt::Display for VoiceJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Preparing => "preparing",
            Self::Training => "training",
            Self::Validating => "validating",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        })
    }
}

impl From<String> for VoiceJobStatus {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "preparing" => Self::Preparing,
            "training" => Self::Training,
            "validating" => Self::Validating,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// A model install job as reported by `GET /catalog`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogJob {
    #[serde(default, deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    pub status: CatalogJobStatus,
    /// Percent, 0-100.
    #[serde(default, deserialize_with = "percent")]
    pub progress: Option<f32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub started_at: Option<f64>,
}

/// A catalog entry. The backend sends either a bare name or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ModelEntryWire")]
pub struct ModelEntry {
    pub name: String,
    pub size: Option<u64>,
    pub description: Option<String>,
    pub installed: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelEntryWire {
    Name(String),
    Entry {
        name: String,
        #[serde(default)]
        size: Option<u64>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        installed: bool,
    },
}

impl From<ModelEntryWire> for ModelEntry {
    fn from(wire: ModelEntryWire) -> Self {
        match wire {
            ModelEntryWire::Name(name) => Self {
                name,
                size: None,
                description: None,
                installed: false,
            },
            ModelEntryWire::Entry {
                name,
                size,
                description,
                installed,
            } => Self {
                name,
                size,
                description,
                installed,
            },
        }
    }
}

/// Response of `GET /catalog`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSnapshot {
    pub available: bool,
    pub cli_available: bool,
    pub remote_available: bool,
    pub installed: Vec<ModelEntry>,
    pub popular: Vec<ModelEntry>,
    pub jobs: BTreeMap<String, CatalogJob>,
    pub default_model: Option<String>,
}

impl CatalogSnapshot {
    pub fn has_active_jobs(&self) -> bool {
        self.jobs.values().any(|job| job.status.is_active())
    }

    /// Jobs keyed by id, with the map key filled in where the body omitted it.
    pub fn jobs_with_ids(&self) -> Vec<CatalogJob> {
        self.jobs
            .iter()
            .map(|(id, job)| {
                let mut job = job.clone();
                if job.id.is_empty() {
                    job.id = id.clone();
                }
                job
            })
            .collect()
    }
}

/// A registered remote inference server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub name: String,
    pub base_url: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub healthy: Option<bool>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub tokens_per_sec: Option<f64>,
    /// Injected by the backend environment; cannot be deleted or disabled.
    #[serde(default)]
    pub ephemeral: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Body of `POST /servers`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerUpsert {
    pub name: String,
    pub base_url: String,
    pub enabled: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum ServerList {
    Bare(Vec<ServerRecord>),
    Wrapped { servers: Vec<ServerRecord> },
}

impl ServerList {
    pub(crate) fn into_vec(self) -> Vec<ServerRecord> {
        match self {
            Self::Bare(v) | Self::Wrapped { servers: v } => v,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct LlmModelList {
    #[serde(default)]
    pub models: Vec<String>,
}

/// A stored voice sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Deserialize)]
pub(crate) struct SampleList {
    #[serde(default)]
    pub samples: Vec<Sample>,
}

/// A voice training job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceJob {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub status: VoiceJobStatus,
    /// Percent, 0-100, whatever scale the backend used.
    #[serde(default, deserialize_with = "percent_from_either_scale")]
    pub progress: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<f64>,
}

#[derive(Deserialize)]
pub(crate) struct JobList {
    #[serde(default)]
    pub jobs: Vec<VoiceJob>,
}

/// An audio payload to upload as one multipart file part.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFile {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl AudioFile {
    pub fn wav(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime: "audio/wav".into(),
            bytes,
        }
    }
}

/// Clamp a percent value into 0-100.
pub fn clamp_percent(raw: f32) -> f32 {
    if raw.is_finite() {
        raw.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Voice progress arrives as a 0-1 fraction or a 0-100 percent.
/// Values up to 1.0 are read as fractions, so a percent-scale `1` shows as
/// 100%; the backend sends no field saying which scale it used.
pub fn normalize_progress(raw: f32) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    if raw <= 1.0 {
        clamp_percent(raw * 100.0)
    } else {
        clamp_percent(raw)
    }
}

fn percent<'de, D>(d: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(d)?.map(clamp_percent))
}

fn percent_from_either_scale<'de, D>(d: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(d)?.map(normalize_progress))
}

fn id_from_string_or_number<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("invalid id: {other}"))),
    }
}

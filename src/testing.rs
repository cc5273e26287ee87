//! In-memory backend and microphone fakes shared by unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;

use crate::api::{
    ApiError, AudioFile, CatalogApi, CatalogJob, CatalogJobStatus, CatalogSnapshot, Sample,
    ServerApi, ServerRecord, ServerUpsert, VoiceApi, VoiceJob, VoiceJobStatus,
};
use crate::app::ConsoleEvent;
use crate::capture::{CaptureDevice, CaptureError, CaptureStream};

pub fn drain(rx: &Receiver<ConsoleEvent>) -> Vec<ConsoleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn job(id: &str, model: &str, status: CatalogJobStatus) -> CatalogJob {
    CatalogJob {
        id: id.into(),
        model: Some(model.into()),
        status,
        progress: None,
        error: None,
        message: None,
        started_at: None,
    }
}

pub fn voice_job(id: &str, status: VoiceJobStatus) -> VoiceJob {
    VoiceJob {
        id: id.into(),
        status,
        progress: None,
        message: None,
        error: None,
        started_at: None,
    }
}

pub fn sample(id: &str, size: u64) -> Sample {
    Sample {
        id: id.into(),
        filename: format!("{id}.wav"),
        size,
    }
}

pub fn server(name: &str, url: &str, enabled: bool, ephemeral: bool) -> ServerRecord {
    ServerRecord {
        name: name.into(),
        base_url: url.into(),
        enabled,
        healthy: Some(true),
        latency_ms: None,
        tokens_per_sec: None,
        ephemeral,
    }
}

/// Holds calls: each armed gate makes one call wait until the test sends `()`.
#[derive(Default)]
struct Gate(RefCell<VecDeque<Receiver<()>>>);

impl Gate {
    fn arm(&self) -> Sender<()> {
        let (tx, rx) = async_channel::bounded(1);
        self.0.borrow_mut().push_back(rx);
        tx
    }

    async fn pass(&self) {
        let rx = self.0.borrow_mut().pop_front();
        if let Some(rx) = rx {
            let _ = rx.recv().await;
        }
    }
}

#[derive(Default)]
pub struct FakeCatalogApi {
    responses: RefCell<VecDeque<Result<CatalogSnapshot, ApiError>>>,
    catalog_calls: Cell<usize>,
    installed: RefCell<Vec<String>>,
    install_error: RefCell<Option<ApiError>>,
    fetch_gate: Gate,
}

impl FakeCatalogApi {
    pub fn new(responses: Vec<Result<CatalogSnapshot, ApiError>>) -> Rc<Self> {
        Rc::new(Self {
            responses: RefCell::new(responses.into()),
            ..Self::default()
        })
    }

    pub fn hold_next_fetch(&self) -> Sender<()> {
        self.fetch_gate.arm()
    }

    pub fn fail_install(&self, error: ApiError) {
        *self.install_error.borrow_mut() = Some(error);
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.get()
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.borrow().clone()
    }
}

#[async_trait(?Send)]
impl CatalogApi for FakeCatalogApi {
    async fn catalog(&self) -> Result<CatalogSnapshot, ApiError> {
        self.catalog_calls.set(self.catalog_calls.get() + 1);
        self.fetch_gate.pass().await;
        let next = self.responses.borrow_mut().pop_front();
        next.unwrap_or_else(|| Ok(CatalogSnapshot::default()))
    }

    async fn install(&self, model: &str) -> Result<(), ApiError> {
        if let Some(e) = self.install_error.borrow().clone() {
            return Err(e);
        }
        self.installed.borrow_mut().push(model.to_string());
        Ok(())
    }

    async fn llm_models(&self) -> Result<Vec<String>, ApiError> {
        Ok(vec!["llama3".into(), "mistral".into()])
    }
}

#[derive(Default)]
pub struct FakeServerApi {
    servers: RefCell<Vec<ServerRecord>>,
    list_calls: Cell<usize>,
    upserts: RefCell<Vec<ServerUpsert>>,
    deletes: RefCell<Vec<String>>,
    upsert_error: RefCell<Option<ApiError>>,
    delete_error: RefCell<Option<ApiError>>,
}

impl FakeServerApi {
    pub fn new(servers: Vec<ServerRecord>) -> Rc<Self> {
        Rc::new(Self {
            servers: RefCell::new(servers),
            ..Self::default()
        })
    }

    pub fn fail_upsert(&self, error: ApiError) {
        *self.upsert_error.borrow_mut() = Some(error);
    }

    pub fn fail_delete(&self, error: ApiError) {
        *self.delete_error.borrow_mut() = Some(error);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.get()
    }

    pub fn upserts(&self) -> Vec<ServerUpsert> {
        self.upserts.borrow().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.borrow().clone()
    }
}

#[async_trait(?Send)]
impl ServerApi for FakeServerApi {
    async fn servers(&self) -> Result<Vec<ServerRecord>, ApiError> {
        self.list_calls.set(self.list_calls.get() + 1);
        Ok(self.servers.borrow().clone())
    }

    async fn upsert_server(&self, server: &ServerUpsert) -> Result<(), ApiError> {
        if let Some(e) = self.upsert_error.borrow().clone() {
            return Err(e);
        }
        self.upserts.borrow_mut().push(server.clone());
        Ok(())
    }

    async fn delete_server(&self, name: &str) -> Result<(), ApiError> {
        if let Some(e) = self.delete_error.borrow().clone() {
            return Err(e);
        }
        self.deletes.borrow_mut().push(name.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeVoiceApi {
    samples: RefCell<Vec<Sample>>,
    /// Per project; the last entry repeats once the queue is down to one.
    jobs: RefCell<HashMap<String, VecDeque<Vec<VoiceJob>>>>,
    samples_calls: Cell<usize>,
    jobs_calls: Cell<usize>,
    train_calls: Cell<usize>,
    last_job_limit: Cell<Option<u32>>,
    uploads: RefCell<Vec<(String, Vec<AudioFile>)>>,
    deleted: RefCell<Vec<(String, String)>>,
    upload_error: RefCell<Option<ApiError>>,
    delete_error: RefCell<Option<ApiError>>,
    train_error: RefCell<Option<ApiError>>,
    samples_gate: Gate,
    upload_gate: Gate,
    train_gate: Gate,
}

impl FakeVoiceApi {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn set_samples(&self, samples: Vec<Sample>) {
        *self.samples.borrow_mut() = samples;
    }

    pub fn push_jobs(&self, project: &str, jobs: Vec<VoiceJob>) {
        self.jobs
            .borrow_mut()
            .entry(project.to_string())
            .or_default()
            .push_back(jobs);
    }

    pub fn hold_next_samples(&self) -> Sender<()> {
        self.samples_gate.arm()
    }

    pub fn hold_next_upload(&self) -> Sender<()> {
        self.upload_gate.arm()
    }

    pub fn hold_next_train(&self) -> Sender<()> {
        self.train_gate.arm()
    }

    pub fn fail_upload(&self, error: ApiError) {
        *self.upload_error.borrow_mut() = Some(error);
    }

    pub fn fail_delete(&self, error: ApiError) {
        *self.delete_error.borrow_mut() = Some(error);
    }

    /// Fail the next training request only.
    pub fn fail_train(&self, error: ApiError) {
        *self.train_error.borrow_mut() = Some(error);
    }

    pub fn samples_calls(&self) -> usize {
        self.samples_calls.get()
    }

    pub fn jobs_calls(&self) -> usize {
        self.jobs_calls.get()
    }

    pub fn train_calls(&self) -> usize {
        self.train_calls.get()
    }

    pub fn last_job_limit(&self) -> Option<u32> {
        self.last_job_limit.get()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<AudioFile>)> {
        self.uploads.borrow().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.borrow().clone()
    }
}

#[async_trait(?Send)]
impl VoiceApi for FakeVoiceApi {
    async fn samples(&self, _project: &str) -> Result<Vec<Sample>, ApiError> {
        self.samples_calls.set(self.samples_calls.get() + 1);
        self.samples_gate.pass().await;
        Ok(self.samples.borrow().clone())
    }

    async fn upload_samples(&self, project: &str, files: Vec<AudioFile>) -> Result<(), ApiError> {
        self.upload_gate.pass().await;
        if let Some(e) = self.upload_error.borrow().clone() {
            return Err(e);
        }
        self.uploads.borrow_mut().push((project.to_string(), files));
        Ok(())
    }

    async fn delete_sample(&self, project: &str, id: &str) -> Result<(), ApiError> {
        if let Some(e) = self.delete_error.borrow().clone() {
            return Err(e);
        }
        self.deleted
            .borrow_mut()
            .push((project.to_string(), id.to_string()));
        Ok(())
    }

    async fn jobs(&self, project: &str, limit: u32) -> Result<Vec<VoiceJob>, ApiError> {
        self.jobs_calls.set(self.jobs_calls.get() + 1);
        self.last_job_limit.set(Some(limit));
        let mut jobs = self.jobs.borrow_mut();
        let Some(queue) = jobs.get_mut(project) else {
            return Ok(Vec::new());
        };
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(next.unwrap_or_default())
    }

    async fn train(&self, _project: &str) -> Result<Option<VoiceJob>, ApiError> {
        self.train_calls.set(self.train_calls.get() + 1);
        self.train_gate.pass().await;
        if let Some(e) = self.train_error.borrow_mut().take() {
            return Err(e);
        }
        Ok(Some(voice_job("new", VoiceJobStatus::Queued)))
    }
}

/// A microphone that yields a fixed block of samples per drain.
#[derive(Default)]
pub struct FakeCaptureDevice {
    deny: bool,
    opens: Cell<usize>,
    releases: Rc<Cell<usize>>,
    open_gate: Gate,
}

struct FakeStream {
    releases: Rc<Cell<usize>>,
}

impl CaptureStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn drain(&mut self) -> Vec<f32> {
        vec![0.25; FakeCaptureDevice::CHUNK_SAMPLES]
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.releases.set(self.releases.get() + 1);
    }
}

impl FakeCaptureDevice {
    pub const CHUNK_SAMPLES: usize = 400;

    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn denying() -> Rc<Self> {
        Rc::new(Self {
            deny: true,
            ..Self::default()
        })
    }

    /// The next `open` waits, like a pending permission prompt.
    pub fn hold_next_open(&self) -> Sender<()> {
        self.open_gate.arm()
    }

    pub fn opens(&self) -> usize {
        self.opens.get()
    }

    pub fn releases(&self) -> usize {
        self.releases.get()
    }
}

#[async_trait(?Send)]
impl CaptureDevice for FakeCaptureDevice {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, CaptureError> {
        self.opens.set(self.opens.get() + 1);
        self.open_gate.pass().await;
        if self.deny {
            return Err(CaptureError::PermissionDenied("user dismissed the prompt".into()));
        }
        Ok(Box::new(FakeStream {
            releases: self.releases.clone(),
        }))
    }
}

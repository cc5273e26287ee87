//! Voice samples and training jobs for one project at a time.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use async_channel::Sender;
use futures_util::FutureExt;

use crate::api::{ApiError, AudioFile, Sample, VoiceApi, VoiceJob};
use crate::app::ConsoleEvent;
use crate::capture;
use crate::catalog::RefreshOutcome;
use crate::timer::DelayTimer;

/// Backend detail sent with a 400 when the project lacks samples.
const NOT_ENOUGH_SAMPLES: &str = "not_enough_samples";

/// Samples and recent jobs of a project, most recent job first.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingView {
    pub project: String,
    pub samples: Vec<Sample>,
    pub jobs: Vec<VoiceJob>,
}

impl TrainingView {
    pub fn latest_job(&self) -> Option<&VoiceJob> {
        self.jobs.first()
    }

    pub fn is_training(&self) -> bool {
        self.latest_job().is_some_and(|job| job.status.is_active())
    }

    pub fn total_sample_bytes(&self) -> u64 {
        self.samples.iter().map(|s| s.size).sum()
    }
}

/// What a training request led to, as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome {
    Started(Option<VoiceJob>),
    AlreadyRunning,
    NeedMoreSamples,
    Failed(String),
    /// A request for this project was still pending.
    Skipped,
}

impl TrainOutcome {
    fn from_result(result: Result<Option<VoiceJob>, ApiError>) -> Self {
        match result {
            Ok(job) => Self::Started(job),
            Err(e) if e.status() == Some(409) => Self::AlreadyRunning,
            Err(e)
                if e.status() == Some(400)
                    && e.detail().is_some_and(|d| d.contains(NOT_ENOUGH_SAMPLES)) =>
            {
                Self::NeedMoreSamples
            }
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Started(Some(job)) => format!("Training started (job {})", job.id),
            Self::Started(None) => "Training started".into(),
            Self::AlreadyRunning => "Training is already running for this project".into(),
            Self::NeedMoreSamples => "Not enough samples yet, add more samples and try again".into(),
            Self::Failed(e) => format!("Training request failed: {e}"),
            Self::Skipped => "A training request is already pending".into(),
        }
    }
}

pub struct TrainingPoller {
    api: Rc<dyn VoiceApi>,
    events: Sender<ConsoleEvent>,
    interval: Duration,
    job_limit: u32,
    project: RefCell<Option<String>>,
    in_flight: RefCell<HashSet<String>>,
    /// Projects mutated while their fetch was outstanding.
    resync_requested: RefCell<HashSet<String>>,
    train_pending: RefCell<HashSet<String>>,
    timer: DelayTimer,
    last: RefCell<Option<TrainingView>>,
}

impl TrainingPoller {
    pub fn new(
        api: Rc<dyn VoiceApi>,
        events: Sender<ConsoleEvent>,
        interval: Duration,
        job_limit: u32,
    ) -> Rc<Self> {
        Rc::new(Self {
            api,
            events,
            interval,
            job_limit: job_limit.max(1),
            project: RefCell::new(None),
            in_flight: RefCell::new(HashSet::new()),
            resync_requested: RefCell::new(HashSet::new()),
            train_pending: RefCell::new(HashSet::new()),
            timer: DelayTimer::new(),
            last: RefCell::new(None),
        })
    }

    pub fn project(&self) -> Option<String> {
        self.project.borrow().clone()
    }

    pub fn last_view(&self) -> Option<TrainingView> {
        self.last.borrow().clone()
    }

    /// A poll is scheduled, or a fetch for the current project is outstanding.
    pub fn is_polling(&self) -> bool {
        let fetching = self
            .project
            .borrow()
            .as_ref()
            .is_some_and(|p| self.in_flight.borrow().contains(p));
        fetching || self.timer.is_active()
    }

    fn is_current(&self, project: &str) -> bool {
        self.project.borrow().as_deref() == Some(project)
    }

    /// Make `project` current, dropping the previous project's pending poll.
    fn switch_to(&self, project: &str) {
        if self.is_current(project) {
            return;
        }
        let previous = self.project.replace(Some(project.to_string()));
        if self.timer.cancel() {
            log::debug!("Cancelled pending training poll for {previous:?}");
        }
        *self.last.borrow_mut() = None;
        log::info!("Voice project is now {project}");
    }

    /// Fetch samples and recent jobs for `project` and publish them. Keeps
    /// polling every interval while the most recent job is active.
    pub async fn refresh(self: &Rc<Self>, project: &str) -> RefreshOutcome {
        self.switch_to(project);
        if !self.in_flight.borrow_mut().insert(project.to_string()) {
            log::debug!("Training fetch for {project} already in flight");
            return RefreshOutcome::Skipped;
        }
        self.timer.cancel();

        let result = loop {
            let result = self.fetch(project).await;
            let again = self.resync_requested.borrow_mut().remove(project);
            if !again || !self.is_current(project) {
                break result;
            }
            log::debug!("Project {project} changed during fetch, fetching again");
        };
        self.in_flight.borrow_mut().remove(project);

        if !self.is_current(project) {
            log::debug!("Discarding training data for stale project {project}");
            return RefreshOutcome::Skipped;
        }

        match result {
            Ok(view) => {
                let active = view.is_training();
                log::info!(
                    "Project {project}: {} sample(s), latest job {:?}",
                    view.samples.len(),
                    view.latest_job().map(|j| j.status)
                );
                *self.last.borrow_mut() = Some(view.clone());
                let _ = self.events.try_send(ConsoleEvent::TrainingUpdated(view));
                if active {
                    self.schedule_poll(project);
                }
                RefreshOutcome::Updated {
                    has_active_jobs: active,
                }
            }
            Err(e) => {
                log::error!("Training refresh for {project} failed: {e}");
                let _ = self.events.try_send(ConsoleEvent::TrainingFailed {
                    project: project.to_string(),
                    error: e.to_string(),
                });
                RefreshOutcome::Failed
            }
        }
    }

    async fn fetch(&self, project: &str) -> Result<TrainingView, ApiError> {
        let samples = self.api.samples(project).await?;
        let jobs = self.api.jobs(project, self.job_limit).await?;
        Ok(TrainingView {
            project: project.to_string(),
            samples,
            jobs,
        })
    }

    /// Re-fetch `project` after a mutation. An outstanding fetch for it
    /// predates the mutation, so that fetch runs once more instead.
    pub async fn resync(self: &Rc<Self>, project: &str) -> RefreshOutcome {
        if self.in_flight.borrow().contains(project) {
            self.switch_to(project);
            log::debug!("Training fetch for {project} in flight, queueing a resync");
            self.resync_requested
                .borrow_mut()
                .insert(project.to_string());
            return RefreshOutcome::Skipped;
        }
        self.refresh(project).await
    }

    fn schedule_poll(self: &Rc<Self>, project: &str) {
        let poller = Rc::downgrade(self);
        let project = project.to_string();
        self.timer.schedule(
            self.interval,
            async move {
                if let Some(poller) = poller.upgrade() {
                    if poller.is_current(&project) {
                        poller.refresh(&project).await;
                    }
                }
            }
            .boxed_local(),
        );
    }

    /// Ask the backend to train `project`, then re-sync whatever happened.
    pub async fn trigger_training(self: &Rc<Self>, project: &str) -> TrainOutcome {
        if !self.train_pending.borrow_mut().insert(project.to_string()) {
            log::info!("Training request for {project} already pending");
            return TrainOutcome::Skipped;
        }
        let result = self.api.train(project).await;
        self.train_pending.borrow_mut().remove(project);

        let outcome = TrainOutcome::from_result(result);
        match &outcome {
            TrainOutcome::Failed(e) => log::error!("Training request for {project} failed: {e}"),
            other => log::info!("Training request for {project}: {other:?}"),
        }
        let _ = self.events.try_send(ConsoleEvent::TrainingTriggered {
            project: project.to_string(),
            outcome: outcome.clone(),
        });
        self.resync(project).await;
        outcome
    }

    /// Upload audio files from disk as samples of `project`.
    pub async fn upload_files<P: AsRef<Path>>(
        self: &Rc<Self>,
        project: &str,
        paths: &[P],
    ) -> Result<usize, ApiError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let e = ApiError::InvalidRequest(format!("Cannot read {}: {e}", path.display()));
                    self.report_upload(project, &e);
                    return Err(e);
                }
            };
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "sample.wav".into());
            files.push(AudioFile {
                mime: capture::audio_mime(&filename).to_string(),
                filename,
                bytes,
            });
        }
        let count = files.len();
        if count == 0 {
            return Ok(0);
        }

        match self.api.upload_samples(project, files).await {
            Ok(()) => {
                log::info!("Uploaded {count} file(s) to {project}");
                let _ = self.events.try_send(ConsoleEvent::SamplesUploaded {
                    project: project.to_string(),
                    count,
                });
                self.resync(project).await;
                Ok(count)
            }
            Err(e) => {
                self.report_upload(project, &e);
                Err(e)
            }
        }
    }

    fn report_upload(&self, project: &str, error: &ApiError) {
        log::error!("Sample upload to {project} failed: {error}");
        let _ = self.events.try_send(ConsoleEvent::UploadFailed {
            project: project.to_string(),
            error: error.to_string(),
        });
    }

    pub async fn delete_sample(self: &Rc<Self>, project: &str, id: &str) -> Result<(), ApiError> {
        match self.api.delete_sample(project, id).await {
            Ok(()) => {
                log::info!("Deleted sample {id} from {project}");
                let _ = self.events.try_send(ConsoleEvent::SampleDeleted {
                    project: project.to_string(),
                    id: id.to_string(),
                });
                self.resync(project).await;
                Ok(())
            }
            Err(e) => {
                log::error!("Deleting sample {id} from {project} failed: {e}");
                let _ = self.events.try_send(ConsoleEvent::SampleDeleteFailed {
                    project: project.to_string(),
                    id: id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn shutdown(&self) {
        if self.timer.cancel() {
            log::debug!("Cancelled pending training poll");
        }
    }
}

use std::rc::Rc;
use std::time::Duration;

use async_channel::Sender;

use crate::api::{ApiError, CatalogApi, HttpApi, ServerApi, ServerRecord, VoiceApi};
use crate::capture::{CaptureDevice, Microphone};
use crate::catalog::{CatalogPoller, CatalogView};
use crate::config::Config;
use crate::recorder::{Recorder, RecorderState};
use crate::servers::ServerRegistry;
use crate::training::{TrainOutcome, TrainingPoller, TrainingView};

/// Everything components publish for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    CatalogLoading,
    CatalogUpdated(CatalogView),
    CatalogFailed(String),
    InstallRequested(String),
    InstallFailed { model: String, error: String },
    LlmModels(Vec<String>),
    LlmModelsFailed(String),
    ServersUpdated(Vec<ServerRecord>),
    ServersFailed(String),
    ServerActionFailed { name: String, error: String },
    RecorderStateChanged(RecorderState),
    RecordingTick { elapsed: Duration, level: f32 },
    RecordingFailed(String),
    RecordingDiscarded,
    UploadStarted { project: String, filename: String },
    RecordingUploaded { project: String, bytes: usize },
    UploadFailed { project: String, error: String },
    SamplesUploaded { project: String, count: usize },
    SampleDeleted { project: String, id: String },
    SampleDeleteFailed { project: String, id: String, error: String },
    TrainingUpdated(TrainingView),
    TrainingFailed { project: String, error: String },
    TrainingTriggered { project: String, outcome: TrainOutcome },
}

/// One console session: the components and the context they share.
/// Lives on the runtime's local thread inside an `Rc`.
pub struct Session {
    pub config: Config,
    pub catalog: Rc<CatalogPoller>,
    pub servers: Rc<ServerRegistry>,
    pub training: Rc<TrainingPoller>,
    pub recorder: Rc<Recorder>,
}

impl Session {
    pub fn new(
        config: Config,
        catalog_api: Rc<dyn CatalogApi>,
        server_api: Rc<dyn ServerApi>,
        voice_api: Rc<dyn VoiceApi>,
        device: Rc<dyn CaptureDevice>,
        events: Sender<ConsoleEvent>,
    ) -> Rc<Self> {
        let catalog =
            CatalogPoller::new(catalog_api, events.clone(), config.catalog_poll_interval());
        let servers = ServerRegistry::new(server_api, events.clone());
        let training = TrainingPoller::new(
            voice_api.clone(),
            events.clone(),
            config.training_poll_interval(),
            config.job_history_limit,
        );
        let recorder = Recorder::new(
            device,
            voice_api,
            events,
            config.max_recording(),
            config.chunk_interval(),
        );
        Rc::new(Self {
            config,
            catalog,
            servers,
            training,
            recorder,
        })
    }

    /// Session against the configured backend and the default microphone.
    pub fn connect(config: Config, events: Sender<ConsoleEvent>) -> Result<Rc<Self>, ApiError> {
        let api = Rc::new(HttpApi::new(&config.api_base_url, config.request_timeout())?);
        log::info!("Using backend {}", api.base_url());
        Ok(Self::new(
            config,
            api.clone(),
            api.clone(),
            api,
            Rc::new(Microphone),
            events,
        ))
    }

    /// No poll pending and no recording or upload under way.
    pub fn is_settled(&self) -> bool {
        !self.catalog.is_polling()
            && !self.training.is_polling()
            && self.recorder.state() == RecorderState::Idle
    }

    /// Page teardown: cancel pending polls and release the microphone.
    pub fn shutdown(&self) {
        self.catalog.shutdown();
        self.training.shutdown();
        self.recorder.shutdown();
        log::debug!("Session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Voice sample recorder.
//!
//! `Idle -> RequestingPermission -> Recording -> Stopping -> Idle`. The
//! capture stream is owned by the active session and dropped on every stop
//! path before any upload starts.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use async_channel::Sender;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api::{ApiError, AudioFile, VoiceApi};
use crate::app::ConsoleEvent;
use crate::capture::{self, CaptureDevice, CaptureError, CaptureStream};
use crate::timer::DelayTimer;

/// Samples considered for the input level meter (~80ms at 16kHz).
const LEVEL_WINDOW: usize = 1280;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    RequestingPermission,
    Recording,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecorderError {
    #[error("A recording is already in progress")]
    Busy,
    #[error("Not recording")]
    NotRecording,
    #[error("Recording was cancelled")]
    Cancelled,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("Could not encode recording: {0}")]
    Encode(String),
    #[error("Upload failed: {0}")]
    Upload(ApiError),
}

/// How a recording ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Uploaded { duration: Duration, bytes: usize },
    Discarded,
    /// Nothing was captured, so nothing was uploaded.
    Empty,
}

struct RecorderSession {
    stream: Box<dyn CaptureStream>,
    chunks: Vec<Vec<f32>>,
    started_at: Instant,
    project: String,
}

impl RecorderSession {
    /// Move newly captured audio into a chunk; returns the chunk's level.
    fn collect(&mut self) -> f32 {
        let chunk = self.stream.drain();
        let level = capture::rms(&chunk, LEVEL_WINDOW);
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
        level
    }
}

pub struct Recorder {
    device: Rc<dyn CaptureDevice>,
    api: Rc<dyn VoiceApi>,
    events: Sender<ConsoleEvent>,
    max_duration: Duration,
    chunk_interval: Duration,
    state: Cell<RecorderState>,
    /// Bumped by every start and teardown; an open that resolves under an
    /// older generation is stale.
    generation: Cell<u64>,
    uploading: Cell<bool>,
    session: RefCell<Option<RecorderSession>>,
    auto_stop: DelayTimer,
    ticker: RefCell<Option<JoinHandle<()>>>,
}

impl Recorder {
    pub fn new(
        device: Rc<dyn CaptureDevice>,
        api: Rc<dyn VoiceApi>,
        events: Sender<ConsoleEvent>,
        max_duration: Duration,
        chunk_interval: Duration,
    ) -> Rc<Self> {
        Rc::new(Self {
            device,
            api,
            events,
            max_duration,
            chunk_interval,
            state: Cell::new(RecorderState::Idle),
            generation: Cell::new(0),
            uploading: Cell::new(false),
            session: RefCell::new(None),
            auto_stop: DelayTimer::new(),
            ticker: RefCell::new(None),
        })
    }

    pub fn state(&self) -> RecorderState {
        self.state.get()
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.get()
    }

    fn set_state(&self, state: RecorderState) {
        if self.state.replace(state) != state {
            log::debug!("Recorder -> {state:?}");
            let _ = self
                .events
                .try_send(ConsoleEvent::RecorderStateChanged(state));
        }
    }

    fn fail(&self, message: String) {
        log::error!("Recording failed: {message}");
        let _ = self.events.try_send(ConsoleEvent::RecordingFailed(message));
    }

    /// Acquire the microphone and start recording a sample for `project`.
    pub async fn start(self: &Rc<Self>, project: &str) -> Result<(), RecorderError> {
        if self.state.get() != RecorderState::Idle {
            log::info!("Ignoring start while {:?}", self.state.get());
            return Err(RecorderError::Busy);
        }
        let generation = self.generation.get().wrapping_add(1);
        self.generation.set(generation);
        self.set_state(RecorderState::RequestingPermission);

        let stream = match self.device.open().await {
            Ok(stream) => stream,
            Err(e) => {
                if self.generation.get() == generation {
                    self.set_state(RecorderState::Idle);
                    self.fail(e.to_string());
                }
                return Err(e.into());
            }
        };

        // torn down, and maybe restarted, while waiting for permission
        if self.generation.get() != generation {
            drop(stream);
            log::info!("Recorder torn down during permission request, device released");
            return Err(RecorderError::Cancelled);
        }

        log::info!("Recording sample for project {project}");
        *self.session.borrow_mut() = Some(RecorderSession {
            stream,
            chunks: Vec::new(),
            started_at: Instant::now(),
            project: project.to_string(),
        });
        self.set_state(RecorderState::Recording);
        self.start_ticker();

        let recorder = Rc::downgrade(self);
        let max = self.max_duration;
        self.auto_stop.schedule(
            max,
            async move {
                if let Some(recorder) = recorder.upgrade() {
                    log::info!("Maximum recording length of {max:?} reached");
                    let _ = recorder.stop(false).await;
                }
            }
            .boxed_local(),
        );
        Ok(())
    }

    fn start_ticker(self: &Rc<Self>) {
        let recorder = Rc::downgrade(self);
        let period = self.chunk_interval;
        let handle = tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(recorder) = recorder.upgrade() else {
                    break;
                };
                recorder.tick();
            }
        });
        if let Some(old) = self.ticker.borrow_mut().replace(handle) {
            old.abort();
        }
    }

    fn tick(&self) {
        let tick = self.session.borrow_mut().as_mut().map(|session| {
            let level = session.collect();
            (session.started_at.elapsed(), level)
        });
        if let Some((elapsed, level)) = tick {
            let _ = self
                .events
                .try_send(ConsoleEvent::RecordingTick { elapsed, level });
        }
    }

    fn stop_background(&self) {
        self.auto_stop.cancel();
        if let Some(ticker) = self.ticker.borrow_mut().take() {
            ticker.abort();
        }
    }

    /// Stop recording. With `skip_upload` the audio is thrown away.
    pub async fn stop(self: &Rc<Self>, skip_upload: bool) -> Result<StopOutcome, RecorderError> {
        if self.state.get() != RecorderState::Recording {
            return Err(RecorderError::NotRecording);
        }
        self.set_state(RecorderState::Stopping);
        self.stop_background();

        let Some(mut session) = self.session.borrow_mut().take() else {
            self.set_state(RecorderState::Idle);
            return Err(RecorderError::NotRecording);
        };
        session.collect();
        let sample_rate = session.stream.sample_rate();
        let duration = session.started_at.elapsed();
        let RecorderSession {
            stream,
            chunks,
            project,
            ..
        } = session;
        drop(stream);
        log::info!("Recording stopped after {:.1}s, device released", duration.as_secs_f32());

        if skip_upload {
            self.set_state(RecorderState::Idle);
            let _ = self.events.try_send(ConsoleEvent::RecordingDiscarded);
            return Ok(StopOutcome::Discarded);
        }

        let samples = chunks.concat();
        if samples.is_empty() {
            self.set_state(RecorderState::Idle);
            self.fail("No audio captured".into());
            return Ok(StopOutcome::Empty);
        }

        let bytes = match capture::samples_to_wav(&samples, sample_rate) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.set_state(RecorderState::Idle);
                self.fail(format!("Could not encode recording: {e}"));
                return Err(RecorderError::Encode(e.to_string()));
            }
        };
        let size = bytes.len();
        let filename = format!(
            "recording-{}.wav",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        );

        self.uploading.set(true);
        let _ = self.events.try_send(ConsoleEvent::UploadStarted {
            project: project.clone(),
            filename: filename.clone(),
        });
        let result = self
            .api
            .upload_samples(&project, vec![AudioFile::wav(filename, bytes)])
            .await;
        self.uploading.set(false);
        self.set_state(RecorderState::Idle);

        match result {
            Ok(()) => {
                log::info!("Uploaded {size} byte sample to {project}");
                let _ = self.events.try_send(ConsoleEvent::RecordingUploaded {
                    project,
                    bytes: size,
                });
                Ok(StopOutcome::Uploaded {
                    duration,
                    bytes: size,
                })
            }
            Err(e) => {
                log::error!("Sample upload failed: {e}");
                let _ = self.events.try_send(ConsoleEvent::UploadFailed {
                    project,
                    error: e.to_string(),
                });
                Err(RecorderError::Upload(e))
            }
        }
    }

    /// Teardown: discard any active session and release the device.
    pub fn shutdown(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
        self.stop_background();
        let had_session = self.session.borrow_mut().take().is_some();
        match self.state.get() {
            RecorderState::Recording | RecorderState::RequestingPermission => {
                self.set_state(RecorderState::Idle);
            }
            _ => {}
        }
        if had_session {
            log::info!("Recorder shut down, active recording discarded");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

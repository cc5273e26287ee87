//! Model catalog poller.
//!
//! Fetches `GET /catalog`, publishes a derived [`CatalogView`], and keeps
//! re-polling on a fixed delay while any install job is pending or running.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use async_channel::Sender;
use futures_util::FutureExt;

use crate::api::{ApiError, CatalogApi, CatalogJob, CatalogSnapshot, ModelEntry};
use crate::app::ConsoleEvent;
use crate::timer::DelayTimer;

/// A popular model as offered for installation.
#[derive(Debug, Clone, PartialEq)]
pub struct PopularModel {
    pub name: String,
    pub description: Option<String>,
    pub installed: bool,
    /// An install job for this model is pending or running.
    pub installing: bool,
}

impl PopularModel {
    pub fn can_install(&self) -> bool {
        !self.installed && !self.installing
    }
}

/// Everything the presentation layer needs from one catalog snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogView {
    pub available: bool,
    pub cli_available: bool,
    pub remote_available: bool,
    /// One-line availability summary, including the installed count.
    pub availability: String,
    pub installed: Vec<ModelEntry>,
    pub popular: Vec<PopularModel>,
    pub active_jobs: Vec<CatalogJob>,
    pub failed_jobs: Vec<CatalogJob>,
    pub default_model: Option<String>,
    pub has_active_jobs: bool,
}

impl CatalogView {
    pub fn from_snapshot(snapshot: &CatalogSnapshot) -> Self {
        let jobs = snapshot.jobs_with_ids();
        let (active_jobs, rest): (Vec<_>, Vec<_>) =
            jobs.into_iter().partition(|job| job.status.is_active());
        let failed_jobs = rest
            .into_iter()
            .filter(|job| job.status == crate::api::CatalogJobStatus::Error)
            .collect();

        let popular = snapshot
            .popular
            .iter()
            .map(|entry| PopularModel {
                name: entry.name.clone(),
                description: entry.description.clone(),
                installed: entry.installed
                    || snapshot
                        .installed
                        .iter()
                        .any(|m| same_model(&m.name, &entry.name)),
                installing: active_jobs.iter().any(|job| {
                    job.model
                        .as_deref()
                        .is_some_and(|m| same_model(m, &entry.name))
                }),
            })
            .collect();

        Self {
            available: snapshot.available,
            cli_available: snapshot.cli_available,
            remote_available: snapshot.remote_available,
            availability: availability_line(snapshot),
            installed: snapshot.installed.clone(),
            popular,
            has_active_jobs: snapshot.has_active_jobs(),
            active_jobs,
            failed_jobs,
            default_model: snapshot.default_model.clone(),
        }
    }

    /// Popular models that get an install action.
    pub fn install_actions(&self) -> impl Iterator<Item = &PopularModel> {
        self.popular.iter().filter(|m| m.can_install())
    }
}

/// "llama3" matches "llama3:latest"; explicit tags must match exactly.
fn same_model(a: &str, b: &str) -> bool {
    fn normalized(name: &str) -> &str {
        name.strip_suffix(":latest").unwrap_or(name)
    }
    normalized(a).eq_ignore_ascii_case(normalized(b))
}

fn availability_line(snapshot: &CatalogSnapshot) -> String {
    let count = snapshot.installed.len();
    let noun = if count == 1 { "model" } else { "models" };
    let mut line = if snapshot.available {
        format!("Model runtime available, {count} {noun} installed")
    } else {
        format!("Model runtime unavailable, {count} {noun} installed")
    };
    if !snapshot.cli_available {
        line.push_str(" (CLI not found)");
    }
    if snapshot.remote_available {
        line.push_str(" (remote servers reachable)");
    }
    line
}

/// Result of one `refresh` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another fetch was already outstanding; nothing was requested.
    Skipped,
    Updated { has_active_jobs: bool },
    Failed,
}

pub struct CatalogPoller {
    api: Rc<dyn CatalogApi>,
    events: Sender<ConsoleEvent>,
    interval: Duration,
    in_flight: Cell<bool>,
    /// A mutation landed while a fetch was outstanding.
    resync_requested: Cell<bool>,
    timer: DelayTimer,
    last: RefCell<Option<CatalogSnapshot>>,
}

impl CatalogPoller {
    pub fn new(
        api: Rc<dyn CatalogApi>,
        events: Sender<ConsoleEvent>,
        interval: Duration,
    ) -> Rc<Self> {
        Rc::new(Self {
            api,
            events,
            interval,
            in_flight: Cell::new(false),
            resync_requested: Cell::new(false),
            timer: DelayTimer::new(),
            last: RefCell::new(None),
        })
    }

    /// Fetch and publish the catalog. `force` marks a user-triggered refresh,
    /// which shows a loading state first.
    pub async fn refresh(self: &Rc<Self>, force: bool) -> RefreshOutcome {
        if self.in_flight.get() {
            log::debug!("Catalog fetch already in flight, skipping refresh");
            return RefreshOutcome::Skipped;
        }
        self.timer.cancel();
        self.in_flight.set(true);
        if force {
            let _ = self.events.try_send(ConsoleEvent::CatalogLoading);
        }

        let result = loop {
            let result = self.api.catalog().await;
            if !self.resync_requested.replace(false) {
                break result;
            }
            log::debug!("Catalog changed during fetch, fetching again");
        };
        self.in_flight.set(false);

        match result {
            Ok(snapshot) => {
                let view = CatalogView::from_snapshot(&snapshot);
                let has_active_jobs = view.has_active_jobs;
                log::info!(
                    "Catalog: {} installed, {} popular, {} active job(s)",
                    view.installed.len(),
                    view.popular.len(),
                    view.active_jobs.len()
                );
                *self.last.borrow_mut() = Some(snapshot);
                let _ = self.events.try_send(ConsoleEvent::CatalogUpdated(view));
                if has_active_jobs {
                    self.schedule_poll();
                }
                RefreshOutcome::Updated { has_active_jobs }
            }
            Err(e) => {
                log::error!("Catalog refresh failed: {e}");
                let _ = self
                    .events
                    .try_send(ConsoleEvent::CatalogFailed(e.to_string()));
                RefreshOutcome::Failed
            }
        }
    }

    /// Re-fetch after a mutation. If a fetch is already outstanding its
    /// result predates the mutation, so that fetch runs once more instead.
    pub async fn resync(self: &Rc<Self>) -> RefreshOutcome {
        if self.in_flight.get() {
            log::debug!("Catalog fetch in flight, queueing a resync");
            self.resync_requested.set(true);
            return RefreshOutcome::Skipped;
        }
        self.refresh(true).await
    }

    fn schedule_poll(self: &Rc<Self>) {
        log::debug!("Install job active, polling again in {:?}", self.interval);
        let poller = Rc::downgrade(self);
        self.timer.schedule(
            self.interval,
            async move {
                if let Some(poller) = poller.upgrade() {
                    poller.refresh(false).await;
                }
            }
            .boxed_local(),
        );
    }

    /// Ask the backend to pull `model`, then re-sync the catalog.
    pub async fn install_model(self: &Rc<Self>, model: &str) -> Result<(), ApiError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(ApiError::InvalidRequest("Model name is required".into()));
        }
        let _ = self
            .events
            .try_send(ConsoleEvent::InstallRequested(model.to_string()));

        match self.api.install(model).await {
            Ok(()) => {
                log::info!("Install of {model} accepted");
                self.resync().await;
                Ok(())
            }
            Err(e) => {
                log::error!("Install of {model} failed: {e}");
                let _ = self.events.try_send(ConsoleEvent::InstallFailed {
                    model: model.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Fetch the model names the LLM backend can serve.
    pub async fn list_llm_models(&self) -> Result<Vec<String>, ApiError> {
        match self.api.llm_models().await {
            Ok(models) => {
                let _ = self
                    .events
                    .try_send(ConsoleEvent::LlmModels(models.clone()));
                Ok(models)
            }
            Err(e) => {
                log::error!("Listing LLM models failed: {e}");
                let _ = self
                    .events
                    .try_send(ConsoleEvent::LlmModelsFailed(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn last_snapshot(&self) -> Option<CatalogSnapshot> {
        self.last.borrow().clone()
    }

    /// A poll is scheduled or a fetch is outstanding.
    pub fn is_polling(&self) -> bool {
        self.in_flight.get() || self.timer.is_active()
    }

    pub fn shutdown(&self) {
        if self.timer.cancel() {
            log::debug!("Cancelled pending catalog poll");
        }
    }
}

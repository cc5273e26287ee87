//! Plain-text rendering of console events.

use std::time::Duration;

use chrono::{DateTime, Local};

use super::state::ConsoleEvent;
use crate::api::{CatalogJob, ServerRecord, VoiceJob};
use crate::catalog::CatalogView;
use crate::recorder::RecorderState;
use crate::training::TrainingView;

/// Human-readable lines for one event. `None` for events that render nothing.
pub fn render(event: &ConsoleEvent) -> Option<String> {
    let text = match event {
        ConsoleEvent::CatalogLoading => "Loading catalog...".to_string(),
        ConsoleEvent::CatalogUpdated(view) => render_catalog(view),
        ConsoleEvent::CatalogFailed(e) => format!("Catalog unavailable: {e}"),
        ConsoleEvent::InstallRequested(model) => format!("Installing {model}..."),
        ConsoleEvent::InstallFailed { model, error } => format!("Install of {model} failed: {error}"),
        ConsoleEvent::LlmModels(models) if models.is_empty() => "No LLM models available".into(),
        ConsoleEvent::LlmModels(models) => {
            let mut out = String::from("LLM models:");
            for m in models {
                out.push_str(&format!("\n  - {m}"));
            }
            out
        }
        ConsoleEvent::LlmModelsFailed(e) => format!("Could not list LLM models: {e}"),
        ConsoleEvent::ServersUpdated(servers) => render_servers(servers),
        ConsoleEvent::ServersFailed(e) => format!("Could not list servers: {e}"),
        ConsoleEvent::ServerActionFailed { name, error } => format!("Server {name}: {error}"),
        ConsoleEvent::RecorderStateChanged(state) => match state {
            RecorderState::Idle => return None,
            RecorderState::RequestingPermission => "Requesting microphone...".into(),
            RecorderState::Recording => "Recording, press Ctrl-C to stop".into(),
            RecorderState::Stopping => "Finishing recording...".into(),
        },
        ConsoleEvent::RecordingTick { elapsed, level } => {
            format!("\r{} {}", clock(*elapsed), meter(*level))
        }
        ConsoleEvent::RecordingFailed(e) => format!("Recording failed: {e}"),
        ConsoleEvent::RecordingDiscarded => "Recording discarded".into(),
        ConsoleEvent::UploadStarted { project, filename } => {
            format!("Uploading {filename} to {project}...")
        }
        ConsoleEvent::RecordingUploaded { project, bytes } => {
            format!("Recording saved to {project} ({})", format_size(*bytes as u64))
        }
        ConsoleEvent::UploadFailed { project, error } => format!("Upload to {project} failed: {error}"),
        ConsoleEvent::SamplesUploaded { project, count } => {
            format!("Uploaded {count} sample(s) to {project}")
        }
        ConsoleEvent::SampleDeleted { project, id } => format!("Deleted sample {id} from {project}"),
        ConsoleEvent::SampleDeleteFailed { project, id, error } => {
            format!("Could not delete sample {id} from {project}: {error}")
        }
        ConsoleEvent::TrainingUpdated(view) => render_training(view),
        ConsoleEvent::TrainingFailed { project, error } => {
            format!("Could not load project {project}: {error}")
        }
        ConsoleEvent::TrainingTriggered { outcome, .. } => outcome.message(),
    };
    Some(text)
}

fn render_catalog(view: &CatalogView) -> String {
    let mut out = view.availability.clone();
    if let Some(ref model) = view.default_model {
        out.push_str(&format!("\nDefault model: {model}"));
    }
    if !view.installed.is_empty() {
        out.push_str("\nInstalled:");
        for m in &view.installed {
            match m.size {
                Some(size) => out.push_str(&format!("\n  - {} ({})", m.name, format_size(size))),
                None => out.push_str(&format!("\n  - {}", m.name)),
            }
        }
    }
    if !view.popular.is_empty() {
        out.push_str("\nPopular:");
        for m in &view.popular {
            let tag = if m.installed {
                "installed"
            } else if m.installing {
                "installing"
            } else {
                "available"
            };
            out.push_str(&format!("\n  - {} [{tag}]", m.name));
        }
        if let Some(first) = view.install_actions().next() {
            out.push_str(&format!(
                "\nInstall with `model-console install {}`",
                first.name
            ));
        }
    }
    for job in &view.active_jobs {
        out.push_str(&format!("\n  ~ {}", describe_catalog_job(job)));
    }
    for job in &view.failed_jobs {
        out.push_str(&format!(
            "\n  ! {}: {}",
            job.model.as_deref().unwrap_or(&job.id),
            job.error.as_deref().unwrap_or("failed")
        ));
    }
    out
}

fn describe_catalog_job(job: &CatalogJob) -> String {
    let mut line = format!("{} {}", job.model.as_deref().unwrap_or(&job.id), job.status);
    if let Some(p) = job.progress {
        line.push_str(&format!(" {p:.0}%"));
    }
    if let Some(ref msg) = job.message {
        line.push_str(&format!(" ({msg})"));
    }
    if let Some(started) = job.started_at.and_then(format_timestamp) {
        line.push_str(&format!(", started {started}"));
    }
    line
}

fn render_servers(servers: &[ServerRecord]) -> String {
    if servers.is_empty() {
        return "No remote servers registered".into();
    }
    let mut out = String::from("Servers:");
    for s in servers {
        let mut line = format!(
            "\n  - {} {} [{}",
            s.name,
            s.base_url,
            if s.enabled { "enabled" } else { "disabled" }
        );
        match s.healthy {
            Some(true) => line.push_str(", healthy"),
            Some(false) => line.push_str(", unreachable"),
            None => {}
        }
        if s.ephemeral {
            line.push_str(", ephemeral");
        }
        line.push(']');
        if let Some(ms) = s.latency_ms {
            line.push_str(&format!(" {ms:.0} ms"));
        }
        if let Some(tps) = s.tokens_per_sec {
            line.push_str(&format!(" {tps:.1} tok/s"));
        }
        out.push_str(&line);
    }
    out
}

fn render_training(view: &TrainingView) -> String {
    let mut out = format!(
        "Project {}: {} sample(s), {}",
        view.project,
        view.samples.len(),
        format_size(view.total_sample_bytes())
    );
    for s in &view.samples {
        out.push_str(&format!("\n  - [{}] {} ({})", s.id, s.filename, format_size(s.size)));
    }
    match view.latest_job() {
        Some(job) => out.push_str(&format!("\nLatest job: {}", describe_voice_job(job))),
        None => out.push_str("\nNo training jobs yet"),
    }
    out
}

fn describe_voice_job(job: &VoiceJob) -> String {
    let mut line = format!("{} {}", job.id, job.status);
    if let Some(p) = job.progress {
        line.push_str(&format!(" {p:.0}%"));
    }
    if let Some(ref msg) = job.message {
        line.push_str(&format!(" ({msg})"));
    }
    if let Some(ref err) = job.error {
        line.push_str(&format!(": {err}"));
    }
    if let Some(started) = job.started_at.and_then(format_timestamp) {
        line.push_str(&format!(", started {started}"));
    }
    line
}

/// Epoch seconds as local time.
fn format_timestamp(secs: f64) -> Option<String> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = (secs.fract() * 1e9) as u32;
    DateTime::from_timestamp(whole, nanos)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn clock(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn meter(level: f32) -> String {
    let bars = ((level.clamp(0.0, 1.0) * 40.0).round() as usize).min(20);
    format!("{:<20}", "#".repeat(bars))
}

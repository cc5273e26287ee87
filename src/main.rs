mod api;
mod app;
mod capture;
mod catalog;
mod config;
mod recorder;
mod servers;
mod timer;
mod training;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use api::{CatalogJobStatus, VoiceJobStatus};
use app::Session;
use catalog::RefreshOutcome;
use config::Config;
use recorder::RecorderState;
use training::TrainOutcome;

#[derive(Parser)]
#[command(name = "model-console", version)]
#[command(about = "Manage models, inference servers and voice training on a local AI backend")]
struct Cli {
    /// Backend base URL, overrides the config file and MODEL_CONSOLE_API
    #[arg(long, global = true)]
    api: Option<String>,

    /// Voice project (defaults to the configured project)
    #[arg(short, long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show installed and popular models and install jobs
    Catalog {
        /// Keep refreshing while install jobs are running
        #[arg(short, long)]
        watch: bool,
    },
    /// Install a model
    Install {
        model: String,
        #[arg(short, long)]
        watch: bool,
    },
    /// List the models the LLM backend can serve
    LlmModels,
    /// Manage remote inference servers
    Servers {
        #[command(subcommand)]
        action: Option<ServerCommand>,
    },
    /// Manage voice samples of a project
    Samples {
        #[command(subcommand)]
        action: Option<SampleCommand>,
    },
    /// Start training the project's voice
    Train {
        /// Follow the job until it finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Record a voice sample from the microphone and upload it
    Record {
        /// Stop after this many seconds (the configured maximum still applies)
        #[arg(long)]
        seconds: Option<u64>,
        /// Throw the recording away instead of uploading it
        #[arg(long)]
        discard: bool,
    },
    /// Show or create the config file
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },
}

#[derive(Subcommand)]
enum ServerCommand {
    List,
    Add {
        name: String,
        url: String,
        #[arg(long)]
        disabled: bool,
    },
    Remove {
        name: String,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
}

#[derive(Subcommand)]
enum SampleCommand {
    List,
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    Path,
    Init,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::load();
    if let Some(ref api) = cli.api {
        config.api_base_url = api.clone();
    }

    if let Command::Config { action } = &cli.command {
        return run_config(action.as_ref().unwrap_or(&ConfigCommand::Show), &config);
    }

    log::info!("Model console starting");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(cli, config))
}

fn run_config(action: &ConfigCommand, config: &Config) -> Result<()> {
    match action {
        ConfigCommand::Show => println!("{}", serde_json::to_string_pretty(config)?),
        ConfigCommand::Path => println!("{}", Config::path().display()),
        ConfigCommand::Init => {
            config
                .save()
                .map_err(|e| anyhow!("Failed to save config: {e}"))?;
            println!("Wrote {}", Config::path().display());
        }
    }
    Ok(())
}

/// Run one command while printing every event the session publishes.
async fn run(cli: Cli, config: Config) -> Result<()> {
    let (events_tx, events_rx) = async_channel::unbounded();
    let session = Session::connect(config, events_tx)?;
    let project = cli
        .project
        .unwrap_or_else(|| session.config.default_project.clone());

    let work = execute(&session, cli.command, &project);
    tokio::pin!(work);
    let result = loop {
        tokio::select! {
            result = &mut work => break result,
            Ok(event) = events_rx.recv() => app::handle_console_event(&session, &event),
        }
    };

    if !session.is_settled() {
        log::debug!("Stopping with polls or a recording still pending");
    }
    session.shutdown();
    while let Ok(event) = events_rx.try_recv() {
        app::handle_console_event(&session, &event);
    }
    result
}

async fn execute(session: &Session, command: Command, project: &str) -> Result<()> {
    match command {
        Command::Catalog { watch } => {
            if session.catalog.refresh(true).await == RefreshOutcome::Failed {
                bail!("Catalog refresh failed");
            }
            if watch {
                wait_until(|| !session.catalog.is_polling()).await;
            }
        }
        Command::Install { model, watch } => {
            session.catalog.install_model(&model).await?;
            if watch {
                wait_until(|| !session.catalog.is_polling()).await;
                let failed = session.catalog.last_snapshot().and_then(|snapshot| {
                    snapshot.jobs_with_ids().into_iter().find(|job| {
                        job.status == CatalogJobStatus::Error
                            && job.model.as_deref() == Some(model.as_str())
                    })
                });
                if let Some(job) = failed {
                    bail!(
                        "Install of {model} failed: {}",
                        job.error.unwrap_or_else(|| "unknown error".into())
                    );
                }
            }
        }
        Command::LlmModels => {
            session.catalog.list_llm_models().await?;
        }
        Command::Servers { action } => match action.unwrap_or(ServerCommand::List) {
            ServerCommand::List => {
                session.servers.refresh().await?;
            }
            ServerCommand::Add {
                name,
                url,
                disabled,
            } => session.servers.upsert(&name, &url, !disabled).await?,
            ServerCommand::Remove { name } => {
                // the cache tells whether the server is ephemeral
                session.servers.refresh().await?;
                session.servers.delete(&name).await?;
            }
            ServerCommand::Enable { name } => set_enabled(session, &name, true).await?,
            ServerCommand::Disable { name } => set_enabled(session, &name, false).await?,
        },
        Command::Samples { action } => match action.unwrap_or(SampleCommand::List) {
            SampleCommand::List => {
                if session.training.refresh(project).await == RefreshOutcome::Failed {
                    bail!("Could not load project {project}");
                }
            }
            SampleCommand::Upload { files } => {
                session.training.upload_files(project, &files).await?;
            }
            SampleCommand::Delete { id } => session.training.delete_sample(project, &id).await?,
        },
        Command::Train { watch } => {
            let outcome = session.training.trigger_training(project).await;
            if let TrainOutcome::Failed(e) = outcome {
                bail!("Training request failed: {e}");
            }
            if watch {
                wait_until(|| !session.training.is_polling()).await;
                let latest = session
                    .training
                    .last_view()
                    .and_then(|view| view.latest_job().cloned());
                if let Some(job) = latest.filter(|j| j.status == VoiceJobStatus::Failed) {
                    bail!(
                        "Training job {} failed: {}",
                        job.id,
                        job.error.unwrap_or_else(|| "unknown error".into())
                    );
                }
            }
        }
        Command::Record { seconds, discard } => record(session, project, seconds, discard).await?,
        Command::Config { .. } => {}
    }
    Ok(())
}

async fn set_enabled(session: &Session, name: &str, enabled: bool) -> Result<()> {
    session.servers.refresh().await?;
    let Some(server) = session.servers.servers().into_iter().find(|s| s.name == name) else {
        bail!("No server named {name}");
    };
    session
        .servers
        .toggle_enabled(name, &server.base_url, enabled)
        .await?;
    Ok(())
}

async fn record(session: &Session, project: &str, seconds: Option<u64>, discard: bool) -> Result<()> {
    let recorder = &session.recorder;
    recorder.start(project).await?;

    let limit = seconds.map(Duration::from_secs);
    let started = tokio::time::Instant::now();
    wait_until(|| {
        recorder.state() != RecorderState::Recording
            || limit.is_some_and(|limit| started.elapsed() >= limit)
    })
    .await;

    if recorder.state() == RecorderState::Recording {
        let outcome = recorder.stop(discard).await?;
        log::info!("Recording finished: {outcome:?}");
    } else {
        // hit the length cap and stopped by itself
        wait_until(|| recorder.state() == RecorderState::Idle && !recorder.is_uploading()).await;
    }
    Ok(())
}

/// Wait until `done` holds or the user presses Ctrl-C.
async fn wait_until(mut done: impl FnMut() -> bool) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while !done() {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
    }
}

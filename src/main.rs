mod cache;
mod cli;
mod command;
mod config;
mod error;
mod orchestrator;
mod paths;
mod queue;
mod state_machine;
mod store;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cache::{LogCache, MemoryCache};
use cli::{Cli, Command};
use config::HemeflowConfig;
use orchestrator::JobOrchestrator;
use paths::JobPaths;
use queue::{Dispatcher, Task, TaskKind};
use state_machine::{Job, JobId};
use store::{FsJobStore, JobStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "hemeflow=debug"
    } else {
        "hemeflow=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => HemeflowConfig::load_from(path)?,
        None => HemeflowConfig::load()?,
    };

    let store: Arc<dyn JobStore> = Arc::new(FsJobStore::new(&config.data_dir));
    let orchestrator = Arc::new(JobOrchestrator::new(store.clone(), config.clone()));

    match cli.command {
        Command::Create {
            stl,
            profile,
            instance_type,
            instance_count,
            image,
        } => {
            let mut job = Job::new(instance_type.into(), instance_count, image.into())?;
            orchestrator.paths().prepare_directories(job.id)?;

            // Stand-in for the upload layer: copy the inputs into place.
            job.stl_file = Some(stage_input(orchestrator.paths(), job.id, &stl)?);
            job.profile_file = Some(stage_input(orchestrator.paths(), job.id, &profile)?);

            store.create(&job).await?;
            println!("{}", job.id);
        }

        Command::Setup { id, inline } => {
            let task = Task {
                job_id: id,
                kind: TaskKind::Setup,
            };
            dispatch(&config, orchestrator, task, inline).await?;
        }

        Command::Run { id, inline } => {
            let task = Task {
                job_id: id,
                kind: TaskKind::Run,
            };
            dispatch(&config, orchestrator, task, inline).await?;
        }

        Command::Status { id: Some(id) } => {
            let job = store.get(id).await?;
            println!("{}", ui::render_job(&job));
        }

        Command::Status { id: None } => {
            for job in store.list().await? {
                println!("{}", ui::render_job_line(&job));
            }
        }

        Command::Logs { id, kind } => {
            let job = store.get(id).await?;
            let logs = LogCache::new(Arc::new(MemoryCache::new()), orchestrator.paths().clone());
            print!("{}", logs.get_output(&job, kind.into())?);
        }

        Command::Package { id } => {
            let archive = orchestrator.package_output(id).await?;
            println!("{}", archive.display());
        }
    }

    Ok(())
}

fn stage_input(paths: &JobPaths, id: JobId, source: &Path) -> Result<String> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid input file name: {}", source.display()))?;
    std::fs::copy(source, paths.input_dir(id).join(name))
        .with_context(|| format!("cannot stage input {}", source.display()))?;
    Ok(format!("inputs/{name}"))
}

async fn dispatch(
    config: &HemeflowConfig,
    orchestrator: Arc<JobOrchestrator>,
    task: Task,
    inline: bool,
) -> Result<()> {
    if inline {
        Dispatcher::inline(orchestrator.clone()).enqueue(task).await?;
        let job = orchestrator.store().get(task.job_id).await?;
        println!("{}", ui::render_job(&job));
    } else {
        // Ctrl-C cancels the in-flight stage; the job ends Failed rather
        // than leaving an orphaned child process behind.
        let canceller = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                canceller.cancel();
            }
        });

        let progress = ui::TaskProgress::start(task.job_id, task.kind);
        let dispatcher = Dispatcher::pool(orchestrator.clone(), config.workers);
        dispatcher.enqueue(task).await?;
        dispatcher.shutdown().await;
        let job = orchestrator.store().get(task.job_id).await?;
        progress.complete(job.status);
    }
    Ok(())
}

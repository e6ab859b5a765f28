//! Enqueue gateway to the background work queue.
//!
//! The orchestrator never talks to the queue's delivery mechanics directly;
//! callers hand a [`Task`] to a [`Dispatcher`], which either runs it inline
//! (testing mode, identical side effects) or feeds a worker pool. One
//! worker slot stays occupied for a job's entire wall-clock runtime, so the
//! pool must be sized for the number of concurrently running jobs.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::HemeflowError;
use crate::orchestrator::JobOrchestrator;
use crate::state_machine::{JobId, JobStatus};
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Setup,
    Run,
}

/// One unit of background work: a job id plus which task body to run.
#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub job_id: JobId,
    pub kind: TaskKind,
}

enum Mode {
    Inline,
    Pool {
        tx: UnboundedSender<Task>,
        workers: Vec<JoinHandle<()>>,
    },
}

/// Hands jobs to the work queue, decoupling callers from its delivery
/// semantics.
pub struct Dispatcher {
    orchestrator: Arc<JobOrchestrator>,
    mode: Mode,
}

impl Dispatcher {
    /// Run every enqueued task synchronously, with the same side effects
    /// the pool produces.
    pub fn inline(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            orchestrator,
            mode: Mode::Inline,
        }
    }

    /// Spawn `workers` slots draining a shared unbounded queue.
    pub fn pool(orchestrator: Arc<JobOrchestrator>, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|slot| {
                let rx = rx.clone();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    loop {
                        let task = { rx.lock().await.recv().await };
                        let Some(task) = task else { break };
                        info!(slot, job = %task.job_id, kind = ?task.kind, "task claimed");
                        execute(&orchestrator, task).await;
                    }
                })
            })
            .collect();

        Self {
            orchestrator,
            mode: Mode::Pool { tx, workers },
        }
    }

    /// Hand a task to the queue.
    ///
    /// Run tasks are persisted as `Queued` before dispatch, so observers
    /// can tell "waiting for a worker slot" apart from "configured".
    pub async fn enqueue(&self, task: Task) -> Result<(), HemeflowError> {
        if task.kind == TaskKind::Run {
            self.orchestrator
                .store()
                .update_status(task.job_id, JobStatus::Queued)
                .await?;
        }

        match &self.mode {
            Mode::Inline => {
                execute(&self.orchestrator, task).await;
                Ok(())
            }
            Mode::Pool { tx, .. } => tx.send(task).map_err(|_| HemeflowError::QueueClosed),
        }
    }

    /// Close the queue and wait for the workers to drain everything
    /// already enqueued.
    pub async fn shutdown(self) {
        if let Mode::Pool { tx, workers } = self.mode {
            drop(tx);
            for worker in workers {
                let _ = worker.await;
            }
        }
    }
}

// Task bodies report failure through the job's status; an Err here means
// the infrastructure itself misbehaved, which a worker can only log.
async fn execute(orchestrator: &JobOrchestrator, task: Task) {
    let result = match task.kind {
        TaskKind::Setup => orchestrator.run_setup(task.job_id).await,
        TaskKind::Run => orchestrator.run_job(task.job_id).await,
    };
    if let Err(e) = result {
        error!(job = %task.job_id, kind = ?task.kind, error = %e, "task body aborted");
    }
}

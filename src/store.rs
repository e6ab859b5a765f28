//! Durable job store port and filesystem backend.
//!
//! The store is an abstract key-value collaborator keyed by job id. Status
//! changes go through [`JobStore::update_status`], a partial write of
//! `status` + `updated` only, validated against the *persisted* status so
//! the terminal-state invariant holds even for stale in-memory copies.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::state_machine::{Job, JobId, JobStatus, TransitionError, validate_transition};

const RECORD_FILE: &str = "job.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt job record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

// A full save may keep the status or move it one legal step; anything else
// is a transition violation.
fn check_status_change(from: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
    if from == to {
        Ok(())
    } else {
        validate_transition(from, to)
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job record. The id must be unused.
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    /// Full read of one record.
    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Full write of every field. Refreshes `updated` and returns the
    /// persisted record.
    async fn save(&self, job: &Job) -> Result<Job, StoreError>;

    /// Partial write restricted to `status` + `updated`. Reads the current
    /// record, validates the transition against its persisted status, and
    /// leaves every other field untouched.
    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<Job, StoreError>;

    /// All records, newest first.
    async fn list(&self) -> Result<Vec<Job>, StoreError>;
}

/// Filesystem-backed store: one JSON record per job at
/// `<root>/<id-hex>/job.json`, written via temp file + rename.
pub struct FsJobStore {
    root: PathBuf,
}

impl FsJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, id: JobId) -> PathBuf {
        self.root.join(id.hex()).join(RECORD_FILE)
    }

    async fn read_record(&self, id: JobId) -> Result<Job, StoreError> {
        let path = self.record_path(id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    async fn write_record(&self, job: &Job) -> Result<(), StoreError> {
        let path = self.record_path(job.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        if tokio::fs::try_exists(self.record_path(job.id)).await? {
            return Err(StoreError::AlreadyExists(job.id));
        }
        self.write_record(job).await?;
        debug!(job = %job.id, "job record created");
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.read_record(id).await
    }

    async fn save(&self, job: &Job) -> Result<Job, StoreError> {
        let current = self.read_record(job.id).await?;
        check_status_change(current.status, job.status)?;

        let mut record = job.clone();
        record.updated = Utc::now();
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<Job, StoreError> {
        let mut record = self.read_record(id).await?;
        validate_transition(record.status, status)?;

        record.status = status;
        record.updated = Utc::now();
        self.write_record(&record).await?;
        debug!(job = %id, status = %status, "status persisted");
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(jobs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let record = entry.path().join(RECORD_FILE);
            match tokio::fs::read_to_string(&record).await {
                Ok(contents) => jobs.push(serde_json::from_str(&contents)?),
                // Directories without a record are not jobs.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        jobs.sort_by(|a: &Job, b: &Job| b.created.cmp(&a.created));
        Ok(jobs)
    }
}

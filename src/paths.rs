//! Canonical per-job filesystem layout.
//!
//! Every path a job touches derives from its id and a single data root:
//! `<root>/<id-hex>/{inputs,logs,result}/`. Pure derivations; the only I/O
//! is [`JobPaths::prepare_directories`].

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::state_machine::JobId;

const INPUT_DIR: &str = "inputs";
const LOG_DIR: &str = "logs";
const RESULT_DIR: &str = "result";
const EXTRACTED_DIR: &str = "Extracted";

/// The three log streams a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Stdout,
    Stderr,
    /// The execution engine's own log, written on the remote nodes.
    Engine,
}

impl LogKind {
    pub const ALL: [LogKind; 3] = [LogKind::Stdout, LogKind::Stderr, LogKind::Engine];

    /// File name under the job's `logs/` directory.
    pub fn file_name(self) -> &'static str {
        match self {
            LogKind::Stdout => "stdout",
            LogKind::Stderr => "stderr",
            LogKind::Engine => "hemelb",
        }
    }
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Root-anchored path derivations for job directories and artifacts.
#[derive(Debug, Clone)]
pub struct JobPaths {
    root: PathBuf,
}

impl JobPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, id: JobId) -> PathBuf {
        self.root.join(id.hex())
    }

    pub fn input_dir(&self, id: JobId) -> PathBuf {
        self.job_dir(id).join(INPUT_DIR)
    }

    pub fn log_dir(&self, id: JobId) -> PathBuf {
        self.job_dir(id).join(LOG_DIR)
    }

    pub fn result_dir(&self, id: JobId) -> PathBuf {
        self.job_dir(id).join(RESULT_DIR)
    }

    /// Directory the solver's extracted property files land in.
    pub fn extracted_dir(&self, id: JobId) -> PathBuf {
        self.result_dir(id).join(EXTRACTED_DIR)
    }

    pub fn log_file(&self, id: JobId, kind: LogKind) -> PathBuf {
        self.log_dir(id).join(kind.file_name())
    }

    /// The converted, visualizable output: `result/<id>.vtu`.
    pub fn output_file(&self, id: JobId) -> PathBuf {
        self.result_dir(id).join(format!("{id}.vtu"))
    }

    /// The packaged archive: `result/<id>.tar.gz`.
    pub fn packaged_output(&self, id: JobId) -> PathBuf {
        self.result_dir(id).join(format!("{id}.tar.gz"))
    }

    /// Resolve a logical artifact path (relative to the job directory)
    /// to an absolute path.
    pub fn resolve(&self, id: JobId, logical: &str) -> PathBuf {
        self.job_dir(id).join(logical)
    }

    /// Create the job's directory tree and touch its log files empty.
    ///
    /// Must be called exactly once per job, before first use; a job
    /// directory that already exists is an error the caller sequences
    /// around, not a condition that is silently absorbed.
    pub fn prepare_directories(&self, id: JobId) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir(self.job_dir(id))?;
        fs::create_dir(self.input_dir(id))?;
        fs::create_dir(self.log_dir(id))?;
        fs::create_dir(self.result_dir(id))?;
        for kind in LogKind::ALL {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_file(id, kind))?;
        }
        Ok(())
    }
}

/// Swap the extension of a logical artifact path: `inputs/a.stl` → `inputs/a.xml`.
pub fn swap_extension(logical: &str, ext: &str) -> String {
    Path::new(logical)
        .with_extension(ext)
        .to_string_lossy()
        .into_owned()
}

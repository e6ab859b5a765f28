//! Log-output cache.
//!
//! Serving a log file on every status poll would re-read a file that grows
//! for the whole wall-clock runtime of a job. [`LogCache`] is a read-through
//! cache in front of those files: misses read the file in full, then cache
//! the content with a TTL conditioned on whether the job can still change —
//! a few seconds while it runs, effectively pinned once it is terminal.
//!
//! The writer (the running command) and the reader (the miss path) are not
//! synchronized; a read may observe a truncated, in-progress log. That is
//! accepted and bounded by the short live TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::paths::{JobPaths, LogKind};
use crate::state_machine::{Job, JobId};

/// Content may still change: cache briefly.
pub const LIVE_TTL: Duration = Duration::from_secs(5);
/// Content is final: cache for a long time.
pub const TERMINAL_TTL: Duration = Duration::from_secs(5000);

#[derive(Debug, Error)]
pub enum LogError {
    /// The log file does not exist yet. Distinct from an empty log.
    #[error("{kind} log for job {job} has not been written yet")]
    NotAvailable { job: JobId, kind: LogKind },

    #[error("log read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key-value cache port with per-key TTL. Injected into [`LogCache`];
/// nothing in this crate holds a process-wide cache singleton.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: Duration);
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache backend with lazy expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.lock().expect("cache poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

fn cache_key(id: JobId, kind: LogKind) -> String {
    format!("{}:log:{}", id.hex(), kind.file_name())
}

/// Read-through log server with status-conditioned freshness.
pub struct LogCache {
    cache: Arc<dyn Cache>,
    paths: JobPaths,
}

impl LogCache {
    pub fn new(cache: Arc<dyn Cache>, paths: JobPaths) -> Self {
        Self { cache, paths }
    }

    /// Serve the content of one of the job's log files.
    ///
    /// A missing file surfaces as [`LogError::NotAvailable`]; an existing
    /// empty file is `Ok("")`.
    pub fn get_output(&self, job: &Job, kind: LogKind) -> Result<String, LogError> {
        let key = cache_key(job.id, kind);
        if let Some(content) = self.cache.get(&key) {
            return Ok(content);
        }

        let path = self.paths.log_file(job.id, kind);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LogError::NotAvailable { job: job.id, kind });
            }
            Err(e) => return Err(e.into()),
        };

        let ttl = if job.status.is_terminal() {
            TERMINAL_TTL
        } else {
            LIVE_TTL
        };
        debug!(job = %job.id, kind = %kind, ttl_secs = ttl.as_secs(), "log cache miss");
        self.cache.set(&key, content.clone(), ttl);
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{ContainerImage, InstanceType, JobStatus};

    fn make_job() -> Job {
        Job::new(InstanceType::Cores2, 1, ContainerImage::HemelbCore002).unwrap()
    }

    fn fixture() -> (tempfile::TempDir, JobPaths, Job) {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = JobPaths::new(tmp.path());
        let job = make_job();
        paths.prepare_directories(job.id).unwrap();
        (tmp, paths, job)
    }

    fn write_log(paths: &JobPaths, job: &Job, kind: LogKind, content: &str) {
        std::fs::write(paths.log_file(job.id, kind), content).unwrap();
    }

    /// Cache double that records the TTL chosen for each set.
    struct RecordingCache {
        inner: MemoryCache,
        last_ttl: Mutex<Option<Duration>>,
    }

    impl RecordingCache {
        fn new() -> Self {
            Self {
                inner: MemoryCache::new(),
                last_ttl: Mutex::new(None),
            }
        }

        fn last_ttl(&self) -> Option<Duration> {
            *self.last_ttl.lock().unwrap()
        }
    }

    impl Cache for RecordingCache {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: String, ttl: Duration) {
            *self.last_ttl.lock().unwrap() = Some(ttl);
            self.inner.set(key, value, ttl);
        }
    }

    /// Cache double that shrinks every TTL so expiry is observable in tests.
    struct ShortTtlCache {
        inner: MemoryCache,
        ttl: Duration,
    }

    impl Cache for ShortTtlCache {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: String, _ttl: Duration) {
            self.inner.set(key, value, self.ttl);
        }
    }

    #[test]
    fn memory_cache_serves_until_expiry() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::from_millis(50));
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn miss_reads_the_file_in_full() {
        let (_tmp, paths, job) = fixture();
        write_log(&paths, &job, LogKind::Stdout, "line 1\nline 2\n");

        let logs = LogCache::new(Arc::new(MemoryCache::new()), paths);
        assert_eq!(
            logs.get_output(&job, LogKind::Stdout).unwrap(),
            "line 1\nline 2\n"
        );
    }

    #[test]
    fn hit_ignores_file_mutation() {
        let (_tmp, paths, job) = fixture();
        write_log(&paths, &job, LogKind::Stdout, "before");

        let logs = LogCache::new(Arc::new(MemoryCache::new()), paths.clone());
        assert_eq!(logs.get_output(&job, LogKind::Stdout).unwrap(), "before");

        write_log(&paths, &job, LogKind::Stdout, "after");
        assert_eq!(logs.get_output(&job, LogKind::Stdout).unwrap(), "before");
    }

    #[test]
    fn mutation_becomes_visible_after_expiry() {
        let (_tmp, paths, job) = fixture();
        write_log(&paths, &job, LogKind::Stdout, "before");

        let cache = ShortTtlCache {
            inner: MemoryCache::new(),
            ttl: Duration::from_millis(50),
        };
        let logs = LogCache::new(Arc::new(cache), paths.clone());
        assert_eq!(logs.get_output(&job, LogKind::Stdout).unwrap(), "before");

        write_log(&paths, &job, LogKind::Stdout, "after");
        assert_eq!(logs.get_output(&job, LogKind::Stdout).unwrap(), "before");

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(logs.get_output(&job, LogKind::Stdout).unwrap(), "after");
    }

    #[test]
    fn log_kinds_are_cached_independently() {
        let (_tmp, paths, job) = fixture();
        write_log(&paths, &job, LogKind::Stdout, "out");
        write_log(&paths, &job, LogKind::Stderr, "err");

        let logs = LogCache::new(Arc::new(MemoryCache::new()), paths);
        assert_eq!(logs.get_output(&job, LogKind::Stdout).unwrap(), "out");
        assert_eq!(logs.get_output(&job, LogKind::Stderr).unwrap(), "err");
    }

    #[test]
    fn live_job_gets_the_short_ttl() {
        let (_tmp, paths, mut job) = fixture();
        write_log(&paths, &job, LogKind::Stdout, "running...");

        let cache = Arc::new(RecordingCache::new());
        let logs = LogCache::new(cache.clone(), paths);

        job.status = JobStatus::Running;
        logs.get_output(&job, LogKind::Stdout).unwrap();
        assert_eq!(cache.last_ttl(), Some(LIVE_TTL));
    }

    #[test]
    fn terminal_job_gets_the_long_ttl() {
        let (_tmp, paths, mut job) = fixture();
        write_log(&paths, &job, LogKind::Stdout, "done");

        let cache = Arc::new(RecordingCache::new());
        let logs = LogCache::new(cache.clone(), paths);

        for status in [JobStatus::Done, JobStatus::Failed] {
            job.status = status;
            logs.get_output(&job, LogKind::Stdout).unwrap();
            assert_eq!(cache.last_ttl(), Some(TERMINAL_TTL));
        }
    }

    #[test]
    fn missing_file_is_distinct_from_empty_log() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = JobPaths::new(tmp.path());
        let job = make_job();
        // No prepare_directories: the log file does not exist.
        let logs = LogCache::new(Arc::new(MemoryCache::new()), paths.clone());
        assert!(matches!(
            logs.get_output(&job, LogKind::Stdout),
            Err(LogError::NotAvailable { kind: LogKind::Stdout, .. })
        ));

        // An existing empty file is simply empty content.
        paths.prepare_directories(job.id).unwrap();
        assert_eq!(logs.get_output(&job, LogKind::Stdout).unwrap(), "");
    }
}

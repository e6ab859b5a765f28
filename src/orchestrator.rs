//! The two task bodies of the job lifecycle: setup and run, plus output
//! packaging.
//!
//! Each pipeline is a strictly sequential chain of external-command stages.
//! A stage failure is converted into a persisted `Failed` status and never
//! surfaces as an `Err` — the job's status field and its logs are the only
//! observable error channel. `Err` is reserved for infrastructure trouble
//! (store unreachable, illegal transition), which the caller can retry or
//! report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::command::{CancelToken, CommandRunner, CommandSpec};
use crate::config::HemeflowConfig;
use crate::error::HemeflowError;
use crate::paths::{JobPaths, LogKind, swap_extension};
use crate::state_machine::{Job, JobId, JobStatus};
use crate::store::JobStore;

/// Drives jobs through the setup and run pipelines.
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    paths: JobPaths,
    config: HemeflowConfig,
    cancel: CancelToken,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn JobStore>, config: HemeflowConfig) -> Self {
        let paths = JobPaths::new(&config.data_dir);
        Self {
            store,
            paths,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    /// Cancel any in-flight pipeline stage. The affected jobs end `Failed`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Setup pipeline: convert the uploaded geometry and profile into the
    /// solver configuration (`.xml`) and input (`.gmy`) files.
    pub async fn run_setup(&self, id: JobId) -> Result<(), HemeflowError> {
        let mut job = self
            .store
            .update_status(id, JobStatus::Preprocessing)
            .await?;

        let (Some(stl), Some(profile)) = (job.stl_file.clone(), job.profile_file.clone()) else {
            return self.fail_stage(id, "setup", "geometry or profile input missing").await;
        };

        let spec = CommandSpec::new(&self.config.setup_tool)
            .arg("--stl")
            .arg(self.paths.resolve(id, &stl).to_string_lossy())
            .arg(self.paths.resolve(id, &profile).to_string_lossy());

        info!(job = %id, "converting geometry and profile inputs");
        let outcome = CommandRunner::run(&spec, None, &self.cancel).await;
        if !outcome.is_success() {
            return self.fail_stage(id, "setup", &outcome.to_string()).await;
        }

        // The setup tool writes its outputs next to the geometry file.
        job.configuration_file = Some(swap_extension(&stl, "xml"));
        job.input_file = Some(swap_extension(&stl, "gmy"));
        job.status = JobStatus::Configured;
        self.store.save(&job).await?;
        info!(job = %id, "setup complete, job configured");
        Ok(())
    }

    /// Run pipeline: provision compute and execute the solver, convert the
    /// raw output, merge extracted properties. Stage N+1 never starts
    /// before stage N's process has exited successfully.
    pub async fn run_job(&self, id: JobId) -> Result<(), HemeflowError> {
        // Persist Running before the long-running command launches, so a
        // crash mid-stage is observably Running, never stuck at Queued.
        let job = self.store.update_status(id, JobStatus::Running).await?;

        let Some(configuration) = job.configuration_file.clone() else {
            return self.fail_stage(id, "provision", "configuration file missing").await;
        };
        let config_path = self.paths.resolve(id, &configuration);

        let provision = self.provision_spec(&job, &config_path);
        info!(
            job = %id,
            nodes = job.instance_count,
            cores = job.core_count(),
            image = %job.container_image,
            "provisioning compute and executing solver"
        );
        let outcome =
            CommandRunner::run(&provision, self.config.stage_timeout(), &self.cancel).await;
        if !outcome.is_success() {
            return self.fail_stage(id, "provision", &outcome.to_string()).await;
        }

        let output = self.paths.output_file(id);
        let convert = CommandSpec::new(&self.config.gmy_converter)
            .arg(config_path.to_string_lossy())
            .arg(output.to_string_lossy());
        info!(job = %id, "converting raw output");
        let outcome = CommandRunner::run(&convert, None, &self.cancel).await;
        if !outcome.is_success() {
            return self.fail_stage(id, "convert", &outcome.to_string()).await;
        }

        let merge = CommandSpec::new(&self.config.extract_converter)
            .arg(output.to_string_lossy())
            .arg(self.paths.extracted_dir(id).to_string_lossy());
        info!(job = %id, "merging extracted properties");
        let outcome = CommandRunner::run(&merge, None, &self.cancel).await;
        if !outcome.is_success() {
            return self.fail_stage(id, "merge", &outcome.to_string()).await;
        }

        let mut done = self.store.get(id).await?;
        done.status = JobStatus::Done;
        self.store.save(&done).await?;
        info!(job = %id, "job done");
        Ok(())
    }

    /// Package the merged result directory into a single archive and record
    /// it as the job's output artifact.
    ///
    /// Packaging is a post-completion convenience: failure does not touch
    /// the job's status, but it is returned to the caller instead of being
    /// swallowed.
    pub async fn package_output(&self, id: JobId) -> Result<PathBuf, HemeflowError> {
        let mut job = self.store.get(id).await?;
        let archive = self.paths.packaged_output(id);

        let spec = CommandSpec::new(&self.config.archive_tool)
            .arg("-czf")
            .arg(archive.to_string_lossy())
            .arg("-C")
            .arg(self.paths.result_dir(id).to_string_lossy())
            .arg("Extracted");

        let outcome = CommandRunner::run(&spec, None, &self.cancel).await;
        if !outcome.is_success() {
            warn!(job = %id, outcome = %outcome, "output packaging failed");
            return Err(HemeflowError::Packaging(outcome));
        }

        job.output_file = Some(format!("result/{id}.tar.gz"));
        self.store.save(&job).await?;
        info!(job = %id, archive = %archive.display(), "output packaged");
        Ok(archive)
    }

    fn provision_spec(&self, job: &Job, config_path: &Path) -> CommandSpec {
        let extra_vars = format!(
            "image={} master_ip={} worker_node_count={} instance_tags={} input={} output={} \
             worker_instance_type={} log_file={} core_count={} container_image={}",
            self.config.image_id,
            self.config.host_ip,
            job.instance_count,
            job.instance_tag(),
            config_path.display(),
            self.paths.result_dir(job.id).display(),
            job.instance_type.provider_id(),
            self.paths.log_file(job.id, LogKind::Engine).display(),
            job.core_count(),
            job.container_image.reference(),
        );

        CommandSpec::new(&self.config.provision_tool)
            .arg("-u")
            .arg("ubuntu")
            .arg("--extra-vars")
            .arg(extra_vars)
            .arg(&self.config.playbook)
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env("AWS_ACCESS_KEY_ID", &self.config.aws_access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &self.config.aws_secret_access_key)
            .stdout_to(self.paths.log_file(job.id, LogKind::Stdout))
            .stderr_to(self.paths.log_file(job.id, LogKind::Stderr))
    }

    async fn fail_stage(
        &self,
        id: JobId,
        stage: &str,
        detail: &str,
    ) -> Result<(), HemeflowError> {
        warn!(job = %id, stage, detail, "pipeline stage failed");
        self.store.update_status(id, JobStatus::Failed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{ContainerImage, InstanceType};
    use crate::store::FsJobStore;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_tool(dir: &Path, name: &str, script: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    struct Fixture {
        _tmp: TempDir,
        tools: PathBuf,
        calls: PathBuf,
        config: HemeflowConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let tools = tmp.path().join("tools");
            std::fs::create_dir(&tools).unwrap();
            let calls = tmp.path().join("calls");

            let config = HemeflowConfig {
                data_dir: tmp.path().join("jobs").to_string_lossy().into_owned(),
                image_id: "ami-test".into(),
                ..HemeflowConfig::default()
            };

            Self {
                _tmp: tmp,
                tools,
                calls,
                config,
            }
        }

        /// A tool that records its invocation, then exits with `code`.
        fn tool(&self, name: &str, code: i32) -> String {
            fake_tool(
                &self.tools,
                name,
                &format!("echo {name} >> {}\nexit {code}", self.calls.display()),
            )
        }

        fn calls(&self) -> String {
            std::fs::read_to_string(&self.calls).unwrap_or_default()
        }

        fn orchestrator(&self) -> JobOrchestrator {
            let store = Arc::new(FsJobStore::new(&self.config.data_dir));
            JobOrchestrator::new(store, self.config.clone())
        }
    }

    async fn added_job(orch: &JobOrchestrator) -> Job {
        let mut job = Job::new(InstanceType::Cores4, 2, ContainerImage::HemelbCore002).unwrap();
        job.stl_file = Some("inputs/aorta.stl".into());
        job.profile_file = Some("inputs/aorta.pr2".into());
        orch.paths().prepare_directories(job.id).unwrap();
        orch.store().create(&job).await.unwrap();
        job
    }

    /// Walk a job to `Queued` the way the real flow does.
    async fn queued_job(orch: &JobOrchestrator) -> Job {
        let mut job = added_job(orch).await;
        let store = orch.store();
        store
            .update_status(job.id, JobStatus::Preprocessing)
            .await
            .unwrap();
        job.status = JobStatus::Configured;
        job.configuration_file = Some("inputs/aorta.xml".into());
        job.input_file = Some("inputs/aorta.gmy".into());
        store.save(&job).await.unwrap();
        store.update_status(job.id, JobStatus::Queued).await.unwrap()
    }

    #[tokio::test]
    async fn setup_success_configures_the_job() {
        let mut fixture = Fixture::new();
        fixture.config.setup_tool = fixture.tool("setup", 0);
        let orch = fixture.orchestrator();
        let job = added_job(&orch).await;

        orch.run_setup(job.id).await.unwrap();

        let loaded = orch.store().get(job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Configured);
        assert_eq!(loaded.configuration_file.as_deref(), Some("inputs/aorta.xml"));
        assert_eq!(loaded.input_file.as_deref(), Some("inputs/aorta.gmy"));
        assert_eq!(fixture.calls(), "setup\n");
    }

    #[tokio::test]
    async fn setup_failure_fails_the_job_and_keeps_artifacts_empty() {
        let mut fixture = Fixture::new();
        fixture.config.setup_tool = fixture.tool("setup", 1);
        let orch = fixture.orchestrator();
        let job = added_job(&orch).await;

        orch.run_setup(job.id).await.unwrap();

        let loaded = orch.store().get(job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert!(loaded.configuration_file.is_none());
        assert!(loaded.input_file.is_none());
    }

    #[tokio::test]
    async fn setup_with_missing_inputs_fails_without_running_the_tool() {
        let mut fixture = Fixture::new();
        fixture.config.setup_tool = fixture.tool("setup", 0);
        let orch = fixture.orchestrator();

        let job = Job::new(InstanceType::Cores2, 1, ContainerImage::HemelbCore002).unwrap();
        orch.paths().prepare_directories(job.id).unwrap();
        orch.store().create(&job).await.unwrap();

        orch.run_setup(job.id).await.unwrap();

        assert_eq!(
            orch.store().get(job.id).await.unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(fixture.calls(), "");
    }

    #[tokio::test]
    async fn run_pipeline_success_reaches_done() {
        let mut fixture = Fixture::new();
        fixture.config.provision_tool = fixture.tool("provision", 0);
        fixture.config.gmy_converter = fixture.tool("convert", 0);
        fixture.config.extract_converter = fixture.tool("merge", 0);
        let orch = fixture.orchestrator();
        let job = queued_job(&orch).await;

        orch.run_job(job.id).await.unwrap();

        assert_eq!(orch.store().get(job.id).await.unwrap().status, JobStatus::Done);
        assert_eq!(fixture.calls(), "provision\nconvert\nmerge\n");
    }

    #[tokio::test]
    async fn provision_failure_short_circuits_the_pipeline() {
        let mut fixture = Fixture::new();
        fixture.config.provision_tool = fixture.tool("provision", 1);
        fixture.config.gmy_converter = fixture.tool("convert", 0);
        fixture.config.extract_converter = fixture.tool("merge", 0);
        let orch = fixture.orchestrator();
        let job = queued_job(&orch).await;

        orch.run_job(job.id).await.unwrap();

        assert_eq!(
            orch.store().get(job.id).await.unwrap().status,
            JobStatus::Failed
        );
        // Later stages never ran and the output was never created.
        assert_eq!(fixture.calls(), "provision\n");
        assert!(!orch.paths().output_file(job.id).exists());
    }

    #[tokio::test]
    async fn conversion_failure_stops_before_the_merge_stage() {
        let mut fixture = Fixture::new();
        fixture.config.provision_tool = fixture.tool("provision", 0);
        fixture.config.gmy_converter = fixture.tool("convert", 2);
        fixture.config.extract_converter = fixture.tool("merge", 0);
        let orch = fixture.orchestrator();
        let job = queued_job(&orch).await;

        orch.run_job(job.id).await.unwrap();

        assert_eq!(
            orch.store().get(job.id).await.unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(fixture.calls(), "provision\nconvert\n");
    }

    #[tokio::test]
    async fn running_is_persisted_before_the_provisioning_command_launches() {
        let mut fixture = Fixture::new();
        let orch = {
            // Placeholder; the real orchestrator is built after the tools,
            // which need the job id baked into their scripts.
            let store = Arc::new(FsJobStore::new(&fixture.config.data_dir));
            JobOrchestrator::new(store, fixture.config.clone())
        };
        let job = queued_job(&orch).await;

        // The provisioning tool snapshots the persisted record at the
        // moment it runs.
        let record = Path::new(&fixture.config.data_dir)
            .join(job.id.hex())
            .join("job.json");
        let snapshot = fixture.tools.join("snapshot.json");
        fixture.config.provision_tool = fake_tool(
            &fixture.tools,
            "provision",
            &format!("cp {} {}", record.display(), snapshot.display()),
        );
        fixture.config.gmy_converter = fixture.tool("convert", 0);
        fixture.config.extract_converter = fixture.tool("merge", 0);
        let orch = fixture.orchestrator();

        orch.run_job(job.id).await.unwrap();

        let seen: Job =
            serde_json::from_str(&std::fs::read_to_string(&snapshot).unwrap()).unwrap();
        assert_eq!(seen.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn provision_deadline_expiry_fails_the_job() {
        let mut fixture = Fixture::new();
        fixture.config.provision_tool = fake_tool(&fixture.tools, "provision", "sleep 30");
        fixture.config.gmy_converter = fixture.tool("convert", 0);
        fixture.config.extract_converter = fixture.tool("merge", 0);
        fixture.config.stage_timeout_secs = 1;
        let orch = fixture.orchestrator();
        let job = queued_job(&orch).await;

        let started = std::time::Instant::now();
        orch.run_job(job.id).await.unwrap();

        assert!(started.elapsed() < std::time::Duration::from_secs(20));
        assert_eq!(
            orch.store().get(job.id).await.unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(fixture.calls(), "");
    }

    #[tokio::test]
    async fn provision_stdout_and_stderr_land_in_the_job_logs() {
        let mut fixture = Fixture::new();
        fixture.config.provision_tool = fake_tool(
            &fixture.tools,
            "provision",
            "echo provisioning nodes\necho permission denied >&2\nexit 1",
        );
        let orch = fixture.orchestrator();
        let job = queued_job(&orch).await;

        orch.run_job(job.id).await.unwrap();

        let stdout =
            std::fs::read_to_string(orch.paths().log_file(job.id, LogKind::Stdout)).unwrap();
        let stderr =
            std::fs::read_to_string(orch.paths().log_file(job.id, LogKind::Stderr)).unwrap();
        assert_eq!(stdout, "provisioning nodes\n");
        assert_eq!(stderr, "permission denied\n");
    }

    #[tokio::test]
    async fn run_job_on_a_terminal_job_is_an_infrastructure_error() {
        let fixture = Fixture::new();
        let orch = fixture.orchestrator();
        let job = added_job(&orch).await;
        orch.store()
            .update_status(job.id, JobStatus::Failed)
            .await
            .unwrap();

        assert!(orch.run_job(job.id).await.is_err());
        assert_eq!(
            orch.store().get(job.id).await.unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn package_output_archives_the_extracted_directory() {
        let fixture = Fixture::new();
        let orch = fixture.orchestrator();
        let job = added_job(&orch).await;

        let extracted = orch.paths().extracted_dir(job.id);
        std::fs::create_dir_all(&extracted).unwrap();
        std::fs::write(extracted.join("velocity.dat"), "0.42").unwrap();

        let archive = orch.package_output(job.id).await.unwrap();
        assert!(archive.exists());
        assert_eq!(archive, orch.paths().packaged_output(job.id));

        let loaded = orch.store().get(job.id).await.unwrap();
        assert_eq!(
            loaded.output_file.as_deref(),
            Some(format!("result/{}.tar.gz", job.id).as_str())
        );
    }

    #[tokio::test]
    async fn package_failure_is_surfaced_and_leaves_status_alone() {
        let mut fixture = Fixture::new();
        fixture.config.archive_tool = fixture.tool("archive", 2);
        let orch = fixture.orchestrator();
        let job = added_job(&orch).await;

        let result = orch.package_output(job.id).await;
        assert!(matches!(result, Err(HemeflowError::Packaging(_))));

        let loaded = orch.store().get(job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Added);
        assert!(loaded.output_file.is_none());
    }
}

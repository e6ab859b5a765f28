//! Terminal output — spinners and colored status rendering.
//!
//! Uses `indicatif` for progress spinners and `console` for styling.
//! [`TaskProgress`] tracks a dispatched task visually while the worker
//! pool drains it.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::queue::TaskKind;
use crate::state_machine::{Job, JobId, JobStatus};

/// Visual progress indicator for one dispatched task.
pub struct TaskProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl TaskProgress {
    /// Start the spinner for a task and return the progress handle.
    pub fn start(id: JobId, kind: TaskKind) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        let label = match kind {
            TaskKind::Setup => "setup",
            TaskKind::Run => "run",
        };
        pb.set_message(format!("{label}: {id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Stop the spinner and report the job's final status.
    pub fn complete(&self, status: JobStatus) {
        self.pb.finish_and_clear();
        match status {
            JobStatus::Failed => {
                println!("  {} job failed ({status})", self.red.apply_to("✗"));
            }
            _ => {
                println!("  {} {status}", self.green.apply_to("✓"));
            }
        }
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Done => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        JobStatus::Running => Style::new().cyan(),
        _ => Style::new().yellow(),
    }
}

/// One-line job summary for listings.
pub fn render_job_line(job: &Job) -> String {
    format!(
        "{}  {:<13}  {} × {:<8}  {}",
        job.id,
        status_style(job.status).apply_to(job.status).to_string(),
        job.instance_count,
        job.instance_type.provider_id(),
        job.created.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// Multi-line job detail for `status <id>`.
pub fn render_job(job: &Job) -> String {
    let mut out = String::new();
    out.push_str(&format!("job:        {}\n", job.id));
    out.push_str(&format!(
        "status:     {}\n",
        status_style(job.status).apply_to(job.status)
    ));
    out.push_str(&format!(
        "resources:  {} × {} ({} cores)\n",
        job.instance_count,
        job.instance_type,
        job.core_count()
    ));
    out.push_str(&format!(
        "image:      {} ({})\n",
        job.container_image,
        job.container_image.hub_url()
    ));
    if let Some(stl) = &job.stl_file {
        out.push_str(&format!("geometry:   {stl}\n"));
    }
    if let Some(profile) = &job.profile_file {
        out.push_str(&format!("profile:    {profile}\n"));
    }
    if let Some(configuration) = &job.configuration_file {
        out.push_str(&format!("config:     {configuration}\n"));
    }
    if let Some(input) = &job.input_file {
        out.push_str(&format!("input:      {input}\n"));
    }
    if let Some(output) = &job.output_file {
        out.push_str(&format!("output:     {output}\n"));
    }
    out.push_str(&format!(
        "created:    {}\n",
        job.created.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "updated:    {}",
        job.updated.format("%Y-%m-%d %H:%M:%S")
    ));
    out
}

//! Configuration loaded from `hemeflow.toml`.
//!
//! [`HemeflowConfig`] holds every tunable: the data root, the external tool
//! paths, provider parameters and worker-pool sizing. Values missing from
//! the file fall back to defaults. The `AWS_ACCESS_KEY_ID` and
//! `AWS_SECRET_ACCESS_KEY` environment variables take precedence over the
//! file for credentials.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::HemeflowError;

const CONFIG_FILE: &str = "hemeflow.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct HemeflowConfig {
    /// Root directory for job records, inputs, logs and results.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Address the provisioned worker nodes report back to.
    #[serde(default = "default_host_ip")]
    pub host_ip: String,

    /// Machine image the provisioning tool boots on each node.
    #[serde(default)]
    pub image_id: String,

    #[serde(default)]
    pub aws_access_key_id: String,

    #[serde(default)]
    pub aws_secret_access_key: String,

    /// Geometry/profile conversion tool (stl + pr2 → xml + gmy).
    #[serde(default = "default_setup_tool")]
    pub setup_tool: String,

    /// Remote provisioning/execution tool.
    #[serde(default = "default_provision_tool")]
    pub provision_tool: String,

    /// Playbook handed to the provisioning tool.
    #[serde(default = "default_playbook")]
    pub playbook: String,

    /// Converter from raw solver output to a `.vtu` grid.
    #[serde(default = "default_gmy_converter")]
    pub gmy_converter: String,

    /// Converter merging extracted property data into the `.vtu` grid.
    #[serde(default = "default_extract_converter")]
    pub extract_converter: String,

    /// Archiver used by output packaging.
    #[serde(default = "default_archive_tool")]
    pub archive_tool: String,

    /// Deadline in seconds for the provisioning/execution stage. 0 disables.
    #[serde(default)]
    pub stage_timeout_secs: u64,

    /// Worker slots in the background pool. Each in-flight job occupies one
    /// slot for its whole wall-clock runtime.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_data_dir() -> String {
    "/var/lib/hemeflow/jobs".to_string()
}

fn default_host_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_setup_tool() -> String {
    "/var/src/hemelb/Tools/setuptool/scripts/hemelb-setup-nogui".to_string()
}

fn default_provision_tool() -> String {
    "ansible-playbook".to_string()
}

fn default_playbook() -> String {
    "scripts/aws_ec2.yml".to_string()
}

fn default_gmy_converter() -> String {
    "/var/src/hemelb/Tools/hemeTools/converters/GmyUnstructuredGridReader.py".to_string()
}

fn default_extract_converter() -> String {
    "/var/src/hemelb/Tools/hemeTools/converters/ExtractedPropertyUnstructuredGridReader.py"
        .to_string()
}

fn default_archive_tool() -> String {
    "tar".to_string()
}

fn default_workers() -> usize {
    4
}

impl Default for HemeflowConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host_ip: default_host_ip(),
            image_id: String::new(),
            aws_access_key_id: String::new(),
            aws_secret_access_key: String::new(),
            setup_tool: default_setup_tool(),
            provision_tool: default_provision_tool(),
            playbook: default_playbook(),
            gmy_converter: default_gmy_converter(),
            extract_converter: default_extract_converter(),
            archive_tool: default_archive_tool(),
            stage_timeout_secs: 0,
            workers: default_workers(),
        }
    }
}

impl HemeflowConfig {
    /// Load `hemeflow.toml` from the current directory, falling back to
    /// defaults if the file does not exist.
    pub fn load() -> Result<Self, HemeflowError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load a specific configuration file, falling back to defaults if it
    /// does not exist.
    pub fn load_from(path: &Path) -> Result<Self, HemeflowError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<HemeflowConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment takes precedence over the file for credentials.
        if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID")
            && !key.is_empty()
        {
            config.aws_access_key_id = key;
        }
        if let Ok(key) = std::env::var("AWS_SECRET_ACCESS_KEY")
            && !key.is_empty()
        {
            config.aws_secret_access_key = key;
        }

        Ok(config)
    }

    /// Deadline for the provisioning/execution stage, if one is configured.
    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }
}

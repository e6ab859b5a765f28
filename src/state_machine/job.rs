use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobStatus;

/// Jobs may scale out to at most this many worker nodes.
pub const MAX_INSTANCE_COUNT: u32 = 36;

/// Opaque job identifier, assigned once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// 32-character lowercase hex form, used for the job's directory name.
    pub fn hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for JobId {
    /// Hyphenated form, used in artifact file names and queue tags.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    /// Accepts both the hyphenated and the 32-char hex form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Worker node size, fixed to the provider's compute-optimized family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceType {
    Cores2,
    Cores4,
    Cores8,
    Cores16,
}

impl InstanceType {
    /// Physical cores per node.
    pub fn cores(self) -> u32 {
        match self {
            InstanceType::Cores2 => 2,
            InstanceType::Cores4 => 4,
            InstanceType::Cores8 => 8,
            InstanceType::Cores16 => 16,
        }
    }

    /// The provider instance id handed to the provisioning tool.
    pub fn provider_id(self) -> &'static str {
        match self {
            InstanceType::Cores2 => "c4.large",
            InstanceType::Cores4 => "c4.xlarge",
            InstanceType::Cores8 => "c4.2xlarge",
            InstanceType::Cores16 => "c4.4xlarge",
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Cores", self.cores())
    }
}

/// Solver container image the remote nodes pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerImage {
    HemelbCore002,
    HemelbCore003,
}

impl ContainerImage {
    /// Full registry reference, passed to the provisioning tool.
    pub fn reference(self) -> &'static str {
        match self {
            ContainerImage::HemelbCore002 => "seiryuz/hemelb-core:0.0.2",
            ContainerImage::HemelbCore003 => "seiryuz/hemelb-core:0.0.3",
        }
    }

    /// Docker Hub page for the image.
    pub fn hub_url(self) -> String {
        let repo = self.reference().split(':').next().unwrap_or_default();
        format!("http://hub.docker.com/r/{repo}")
    }
}

impl fmt::Display for ContainerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())
    }
}

/// One simulation job progressing through preprocessing, remote execution
/// and output conversion.
///
/// Artifact fields hold logical paths relative to the job directory. They
/// are filled at different pipeline stages: `stl_file`/`profile_file` at
/// upload, `configuration_file`/`input_file` by the setup pipeline,
/// `output_file` by output packaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub configuration_file: Option<String>,
    pub input_file: Option<String>,
    pub stl_file: Option<String>,
    pub profile_file: Option<String>,
    pub output_file: Option<String>,
    pub instance_type: InstanceType,
    pub instance_count: u32,
    pub container_image: ContainerImage,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Job {
    /// Create a job with status `Added` and empty artifact references.
    ///
    /// `instance_count` outside 1..=[`MAX_INSTANCE_COUNT`] is rejected.
    pub fn new(
        instance_type: InstanceType,
        instance_count: u32,
        container_image: ContainerImage,
    ) -> Result<Self, crate::error::HemeflowError> {
        if instance_count == 0 || instance_count > MAX_INSTANCE_COUNT {
            return Err(crate::error::HemeflowError::InvalidInstanceCount(
                instance_count,
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: JobId::generate(),
            status: JobStatus::Added,
            configuration_file: None,
            input_file: None,
            stl_file: None,
            profile_file: None,
            output_file: None,
            instance_type,
            instance_count,
            container_image,
            created: now,
            updated: now,
        })
    }

    /// Total solver cores across all worker nodes.
    ///
    /// Derived on demand; never stored, so call sites cannot diverge.
    pub fn core_count(&self) -> u32 {
        self.instance_count * self.instance_type.cores()
    }

    /// Tag scoping the provisioned resources to this job.
    pub fn instance_tag(&self) -> String {
        format!("job-{}", self.id)
    }
}

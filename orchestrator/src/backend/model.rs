use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// Files stored in a config map, keyed by file name.
pub type ConfigMapData = BTreeMap<String, String>;

/// A volume whose content comes from a config map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub config_map: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of the [`Volume`] to mount
    pub name: String,
    pub mount_path: String,
}

/// Everything needed to start a one-shot test runner job.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct JobSpec {
    /// Name prefix of the job. The backend appends a unique suffix.
    pub name: String,
    /// Container image to run
    pub image: String,
    /// Command to run in the container
    pub command: Vec<String>,
    /// Environment variables to set
    #[builder(default)]
    pub env: Vec<(String, String)>,
    #[builder(default)]
    pub volumes: Vec<Volume>,
    #[builder(default)]
    pub volume_mounts: Vec<VolumeMount>,
    /// Deadline of the job as a whole
    #[builder(default = "Duration::from_secs(300)")]
    pub timeout: Duration,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub success: bool,
    pub logs: String,
}

impl JobOutcome {
    pub fn succeeded(logs: impl Into<String>) -> JobOutcome {
        JobOutcome {
            success: true,
            logs: logs.into(),
        }
    }

    pub fn failed(logs: impl Into<String>) -> JobOutcome {
        JobOutcome {
            success: false,
            logs: logs.into(),
        }
    }

    pub fn timed_out() -> JobOutcome {
        JobOutcome::failed(TIMEOUT_MESSAGE)
    }
}

pub const TIMEOUT_MESSAGE: &str = "Timeout waiting for job completion";

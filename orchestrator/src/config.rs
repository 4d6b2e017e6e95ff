//! Service configuration.
//!
//! Configuration is layered: defaults, then an optional TOML file, then
//! environment variables, then command line flags (applied in `main`).

use err_derive::Error;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

pub const API_VERSION: &str = "1.0.0";

/// Where test files are mounted inside the runner container.
pub const EXERCISE_MOUNT_PATH: &str = "/mnt/exercise";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(display = "Failed to read config file {:?}: {}", _0, _1)]
    Read(PathBuf, #[error(source)] std::io::Error),

    #[error(display = "Failed to parse config file: {}", _0)]
    Parse(#[error(source)] toml::de::Error),

    #[error(display = "Invalid value {:?} for environment variable {}", _1, _0)]
    InvalidEnv(&'static str, String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Mock,
    Kubernetes,
    Docker,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Mock => "mock",
            BackendKind::Kubernetes => "kubernetes",
            BackendKind::Docker => "docker",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(BackendKind::Mock),
            "kubernetes" | "k8s" => Ok(BackendKind::Kubernetes),
            "docker" => Ok(BackendKind::Docker),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Address the HTTP server listens on
    pub bind: SocketAddr,
    /// Number of runtime worker threads
    pub workers: usize,
    /// Set `SO_REUSEPORT` on the listening socket
    pub reuse_port: bool,
    /// Maximum accepted request body, in bytes
    pub max_upload_bytes: usize,
    /// Requests accepted per minute. `0` disables limiting.
    pub rate_limit_per_minute: u32,

    /// Skip every external call and simulate job runs
    pub mock_mode: bool,
    /// Simulated job duration in mock mode, in milliseconds
    pub mock_delay_ms: u64,
    /// Job backend used when not in mock mode
    pub backend: BackendKind,

    pub jobs: JobConfig,
    pub kubernetes: KubernetesConfig,
    pub docker: DockerConfig,

    /// Supported languages, keyed by the name used in request paths
    pub languages: BTreeMap<String, LanguageConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let mut languages = BTreeMap::new();
        languages.insert(
            "python".to_string(),
            LanguageConfig {
                image: "exercism/python-test-runner:latest".into(),
                file_extension: "py".into(),
                timeout_secs: Some(60),
            },
        );

        ServiceConfig {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            workers: 4,
            reuse_port: true,
            max_upload_bytes: 2 * 1024 * 1024,
            rate_limit_per_minute: 100,
            mock_mode: true,
            mock_delay_ms: 1000,
            backend: BackendKind::Kubernetes,
            jobs: JobConfig::default(),
            kubernetes: KubernetesConfig::default(),
            docker: DockerConfig::default(),
            languages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LanguageConfig {
    /// Test runner image
    pub image: String,
    /// Extension of the submitted solution file, without the dot
    pub file_extension: String,
    /// Job deadline for this language, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Job deadline when the language declares none
    pub default_timeout_secs: u64,
    /// How long a request waits for its job
    pub wait_timeout_secs: u64,
    /// Interval between job status checks
    pub poll_interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            default_timeout_secs: 120,
            wait_timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

impl JobConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KubernetesConfig {
    /// API server url. Leave empty to use the in-cluster configuration.
    pub api_server: Option<String>,
    /// Bearer token for `api_server`
    pub token: Option<String>,
    /// PEM file of the API server's certificate authority
    pub ca_cert: Option<PathBuf>,
    /// Accept any server certificate. Only meant for local clusters.
    pub accept_invalid_certs: bool,
    /// Namespace test runner jobs are created in
    pub namespace: String,
    /// Seconds a finished job is kept before Kubernetes removes it
    pub job_ttl_secs: u64,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        KubernetesConfig {
            api_server: None,
            token: None,
            ca_cert: None,
            accept_invalid_certs: false,
            namespace: "default".into(),
            job_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DockerConfig {
    /// Pull the runner image before creating each container
    pub pull_images: bool,
    /// Memory limit of runner containers, in bytes
    pub mem_limit: Option<i64>,
    /// CPU share available to a runner container. This field will result
    /// in allowing the CPU to run `cpu_share * 100ms` in every 100ms.
    pub cpu_share: Option<f64>,
    /// Whether network is allowed in runner containers
    pub network_enabled: bool,
    pub cleanup_completed_jobs: bool,
    pub cleanup_failed_jobs: bool,
    /// Cap on collected container output, in bytes
    pub output_size_limit: usize,
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            pull_images: true,
            mem_limit: None,
            cpu_share: Some(0.5),
            network_enabled: false,
            cleanup_completed_jobs: true,
            cleanup_failed_jobs: true,
            output_size_limit: 100 * 1024,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path` (if any) and apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
        let mut cfg = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read(path.to_owned(), e))?;
                Self::from_toml(&content)?
            }
            None => ServiceConfig::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_toml(content: &str) -> Result<ServiceConfig, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from environment variables, read through `var`.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = var("K8S_MOCK_MODE") {
            self.mock_mode = is_truthy(&v);
        }
        if let Some(v) = var("RUNNER_BACKEND") {
            self.backend = v
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("RUNNER_BACKEND", v))?;
        }
        if let Some(v) = var("K8S_NAMESPACE") {
            self.kubernetes.namespace = v;
        }
        if let Some(v) = var("K8S_API_SERVER") {
            self.kubernetes.api_server = Some(v);
        }
        if let Some(v) = var("K8S_TOKEN") {
            self.kubernetes.token = Some(v);
        }
        Ok(())
    }

    /// The backend actually in use, with mock mode taking precedence.
    pub fn effective_backend(&self) -> BackendKind {
        if self.mock_mode {
            BackendKind::Mock
        } else {
            self.backend
        }
    }

    pub fn language(&self, name: &str) -> Option<&LanguageConfig> {
        self.languages.get(name)
    }

    pub fn supported_languages(&self) -> Vec<String> {
        self.languages.keys().cloned().collect()
    }

    /// Deadline of a job running tests for `lang`.
    pub fn job_timeout(&self, lang: &LanguageConfig) -> Duration {
        Duration::from_secs(lang.timeout_secs.unwrap_or(self.jobs.default_timeout_secs))
    }
}

pub fn is_truthy(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

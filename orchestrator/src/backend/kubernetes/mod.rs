//! Runs test runner jobs as Kubernetes `Job`s, talking to the API server over
//! plain REST.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    RequestBuilder, Response,
};
use tokio::time::Instant;

use self::model::{
    ConfigMap, Container, EnvVar, Job, JobStatus, JobStatusResponse, ObjectMeta, PodList, PodSpec,
    PodTemplateSpec,
};
use super::{BackendError, ConfigMapData, JobBackend, JobOutcome, JobSpec};
use crate::{
    config::{BackendKind, KubernetesConfig, ServiceConfig},
    util::unique_name,
};

pub mod model;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Name of the test runner container inside job pods.
pub const RUNNER_CONTAINER_NAME: &str = "test-runner";

/// How to reach the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAccess {
    pub api_server: String,
    pub token: Option<String>,
    pub ca_cert: Option<Vec<u8>>,
}

impl ClusterAccess {
    /// Resolve access from explicit configuration, falling back to the
    /// in-cluster service account. `env` reads environment variables and
    /// `sa_dir` is the service account secret directory.
    pub fn resolve(
        cfg: &KubernetesConfig,
        env: impl Fn(&str) -> Option<String>,
        sa_dir: &Path,
    ) -> Result<ClusterAccess, BackendError> {
        if let Some(api_server) = &cfg.api_server {
            tracing::info!("Using configured Kubernetes API server {}", api_server);
            let ca_cert = cfg.ca_cert.as_ref().map(std::fs::read).transpose()?;
            return Ok(ClusterAccess {
                api_server: api_server.trim_end_matches('/').to_owned(),
                token: cfg.token.clone(),
                ca_cert,
            });
        }

        let (host, port) = match (
            env("KUBERNETES_SERVICE_HOST"),
            env("KUBERNETES_SERVICE_PORT"),
        ) {
            (Some(host), Some(port)) => (host, port),
            _ => {
                return Err(BackendError::Config(
                    "no API server configured and not running inside a cluster".into(),
                ))
            }
        };
        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };

        let token = std::fs::read_to_string(sa_dir.join("token"))?;
        let ca_cert = match std::fs::read(sa_dir.join("ca.crt")) {
            Ok(ca) => Some(ca),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Using in-cluster Kubernetes configuration");

        Ok(ClusterAccess {
            api_server: format!("https://{}:{}", host, port),
            token: Some(token.trim().to_owned()),
            ca_cert,
        })
    }
}

pub struct KubernetesBackend {
    client: reqwest::Client,
    api_server: String,
    namespace: String,
    job_ttl_secs: u64,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl KubernetesBackend {
    /// Build the backend from `cfg` and check that the API server answers.
    pub async fn connect(cfg: &ServiceConfig) -> Result<KubernetesBackend, BackendError> {
        let access = ClusterAccess::resolve(
            &cfg.kubernetes,
            |k| std::env::var(k).ok(),
            Path::new(SERVICE_ACCOUNT_DIR),
        )?;
        let backend = Self::new(access, &cfg.kubernetes)?
            .with_wait(cfg.jobs.wait_timeout(), cfg.jobs.poll_interval());
        backend.test_connection().await?;
        tracing::info!("Using Kubernetes namespace: {}", backend.namespace);
        Ok(backend)
    }

    pub fn new(
        access: ClusterAccess,
        cfg: &KubernetesConfig,
    ) -> Result<KubernetesBackend, BackendError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &access.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| BackendError::Config(format!("invalid token: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(cfg.accept_invalid_certs);
        if let Some(ca) = &access.ca_cert {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(ca)?);
        }

        Ok(KubernetesBackend {
            client: builder.build()?,
            api_server: access.api_server,
            namespace: cfg.namespace.clone(),
            job_ttl_secs: cfg.job_ttl_secs,
            wait_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        })
    }

    pub fn with_wait(mut self, wait_timeout: Duration, poll_interval: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn core_url(&self, rest: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/{}",
            self.api_server, self.namespace, rest
        )
    }

    fn batch_url(&self, rest: &str) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/{}",
            self.api_server, self.namespace, rest
        )
    }

    /// Send a request, turning non-2xx answers into [`BackendError::Api`].
    async fn send(req: RequestBuilder) -> Result<Response, BackendError> {
        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let message = res.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn test_connection(&self) -> Result<(), BackendError> {
        let url = format!("{}/api/v1/namespaces", self.api_server);
        Self::send(self.client.get(&url)).await?;
        Ok(())
    }

    /// Build the API object for a job called `job_name`.
    pub fn job_object(&self, job_name: &str, spec: &JobSpec) -> Job {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("app".to_string(), job_name.to_string());

        let container = Container {
            name: RUNNER_CONTAINER_NAME.into(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            env: spec
                .env
                .iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            volume_mounts: spec.volume_mounts.iter().map(Into::into).collect(),
        };

        Job {
            api_version: "batch/v1".into(),
            kind: "Job".into(),
            metadata: ObjectMeta::named(job_name),
            spec: model::JobSpec {
                template: PodTemplateSpec {
                    metadata: ObjectMeta {
                        name: None,
                        labels,
                    },
                    spec: PodSpec {
                        containers: vec![container],
                        restart_policy: "Never".into(),
                        volumes: spec.volumes.iter().map(Into::into).collect(),
                    },
                },
                // Don't retry on failure
                backoff_limit: 0,
                ttl_seconds_after_finished: self.job_ttl_secs,
                active_deadline_seconds: spec.timeout.as_secs().max(1),
            },
        }
    }

    async fn read_job_status(&self, job_name: &str) -> Result<JobStatus, BackendError> {
        let url = self.batch_url(&format!("jobs/{}/status", job_name));
        let res: JobStatusResponse = Self::send(self.client.get(&url)).await?.json().await?;
        Ok(res.status)
    }

    /// Logs of the first pod created by the job. Errors are reported inside
    /// the returned text.
    pub async fn pod_logs_for_job(&self, job_name: &str) -> String {
        match self.try_pod_logs_for_job(job_name).await {
            Ok(Some(logs)) => logs,
            Ok(None) => "No pods found for the job".into(),
            Err(e) => {
                tracing::error!("Error getting pod logs: {}", e);
                format!("Error retrieving logs: {}", e)
            }
        }
    }

    async fn try_pod_logs_for_job(&self, job_name: &str) -> Result<Option<String>, BackendError> {
        let pods: PodList = Self::send(
            self.client
                .get(&self.core_url("pods"))
                .query(&[("labelSelector", format!("app={}", job_name))]),
        )
        .await?
        .json()
        .await?;

        let pod_name = match pods.items.into_iter().find_map(|p| p.metadata.name) {
            Some(name) => name,
            None => return Ok(None),
        };
        let url = self.core_url(&format!("pods/{}/log", pod_name));
        let logs = Self::send(self.client.get(&url)).await?.text().await?;
        Ok(Some(logs))
    }
}

#[async_trait]
impl JobBackend for KubernetesBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    async fn is_connected(&self) -> bool {
        match self.test_connection().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Kubernetes API connection test failed: {}", e);
                false
            }
        }
    }

    async fn create_config_map(
        &self,
        name: &str,
        data: ConfigMapData,
    ) -> Result<String, BackendError> {
        let name = unique_name(name);
        let body = ConfigMap::new(name.clone(), data);
        tracing::info!("Creating ConfigMap: {}", name);
        Self::send(self.client.post(&self.core_url("configmaps")).json(&body))
            .await
            .map_err(|e| {
                tracing::error!("Failed to create ConfigMap: {}", e);
                e
            })?;
        Ok(name)
    }

    async fn delete_config_map(&self, name: &str) -> Result<(), BackendError> {
        let url = self.core_url(&format!("configmaps/{}", name));
        Self::send(self.client.delete(&url)).await?;
        tracing::info!("Deleted ConfigMap: {}", name);
        Ok(())
    }

    async fn create_job(&self, spec: JobSpec) -> Result<String, BackendError> {
        let job_name = unique_name(&spec.name);
        let body = self.job_object(&job_name, &spec);
        tracing::info!(image = %spec.image, "Creating Kubernetes job: {}", job_name);
        Self::send(self.client.post(&self.batch_url("jobs")).json(&body))
            .await
            .map_err(|e| {
                tracing::error!("Failed to create job: {}", e);
                e
            })?;
        Ok(job_name)
    }

    async fn wait_for_job_completion(&self, job_name: &str) -> Result<JobOutcome, BackendError> {
        tracing::info!("Waiting for job completion: {}", job_name);
        let start = Instant::now();

        while start.elapsed() < self.wait_timeout {
            let status = self.read_job_status(job_name).await?;

            if status.succeeded.unwrap_or(0) > 0 {
                tracing::info!("Job completed successfully: {}", job_name);
                return Ok(JobOutcome::succeeded(self.pod_logs_for_job(job_name).await));
            }
            if status.failed.unwrap_or(0) > 0 {
                tracing::warn!("Job failed: {}", job_name);
                return Ok(JobOutcome::failed(self.pod_logs_for_job(job_name).await));
            }

            tracing::debug!("Job still running: {}", job_name);
            tokio::time::sleep(self.poll_interval).await;
        }

        tracing::error!("Timeout waiting for job completion: {}", job_name);
        Ok(JobOutcome::timed_out())
    }
}

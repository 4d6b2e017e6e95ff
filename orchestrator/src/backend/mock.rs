use std::time::Duration;

use async_trait::async_trait;

use super::{BackendError, ConfigMapData, JobBackend, JobOutcome, JobSpec};
use crate::{
    config::{BackendKind, ServiceConfig},
    util::unique_name,
};

/// A backend that creates nothing and reports every job as passed.
#[derive(Debug, Clone)]
pub struct MockBackend {
    delay: Duration,
}

impl MockBackend {
    pub fn new(delay: Duration) -> MockBackend {
        MockBackend { delay }
    }

    pub fn from_config(cfg: &ServiceConfig) -> MockBackend {
        MockBackend::new(Duration::from_millis(cfg.mock_delay_ms))
    }

    /// Simulated test runner output for a job. The language is the job
    /// name's first dash-separated segment.
    pub fn simulated_logs(job_name: &str) -> &'static str {
        let language = job_name.split('-').next().unwrap_or("unknown");
        match language {
            "python" | "javascript" => {
                r#"{"status": "pass", "tests": [{"name": "test_hello_world", "status": "pass"}]}"#
            }
            _ => r#"{"status": "pass", "message": "All tests passed"}"#,
        }
    }
}

#[async_trait]
impl JobBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    async fn is_connected(&self) -> bool {
        false
    }

    async fn create_config_map(
        &self,
        name: &str,
        data: ConfigMapData,
    ) -> Result<String, BackendError> {
        let name = unique_name(name);
        tracing::info!(files = data.len(), "Mock mode: Simulating ConfigMap creation: {}", name);
        Ok(name)
    }

    async fn delete_config_map(&self, name: &str) -> Result<(), BackendError> {
        tracing::info!("Mock mode: Simulating ConfigMap deletion: {}", name);
        Ok(())
    }

    async fn create_job(&self, spec: JobSpec) -> Result<String, BackendError> {
        let name = unique_name(&spec.name);
        tracing::info!(image = %spec.image, "Mock mode: Simulating job creation: {}", name);
        Ok(name)
    }

    async fn wait_for_job_completion(&self, job_name: &str) -> Result<JobOutcome, BackendError> {
        tracing::info!("Mock mode: Simulating successful job completion: {}", job_name);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(JobOutcome::succeeded(Self::simulated_logs(job_name)))
    }
}

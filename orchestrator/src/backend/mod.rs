//! Job backends: the places test runner containers actually run in.
//!
//! The runner only talks to a [`JobBackend`]. See [`crate::runner`] for how
//! test runs are laid out on top of it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendKind, ServiceConfig};

pub mod docker;
mod err;
pub mod kubernetes;
pub mod mock;
pub mod model;

pub use err::BackendError;
pub use model::{ConfigMapData, JobOutcome, JobSpec, JobSpecBuilder, Volume, VolumeMount};

/// Something that can store test files and run one-shot jobs.
#[async_trait]
pub trait JobBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the backend is reachable. Mock backends are never connected.
    async fn is_connected(&self) -> bool;

    /// Store `data` under a name derived from `name`. Returns the actual name.
    async fn create_config_map(
        &self,
        name: &str,
        data: ConfigMapData,
    ) -> Result<String, BackendError>;

    async fn delete_config_map(&self, name: &str) -> Result<(), BackendError>;

    /// Start a job. Returns the actual job name.
    async fn create_job(&self, spec: JobSpec) -> Result<String, BackendError>;

    /// Wait until the job finishes or the wait timeout elapses, and collect
    /// its logs.
    async fn wait_for_job_completion(&self, job_name: &str) -> Result<JobOutcome, BackendError>;
}

/// Create the backend selected by `cfg`.
///
/// A real backend that cannot be configured or reached is replaced by the
/// mock backend, so the service stays available for development use.
pub async fn connect_backend(cfg: &ServiceConfig) -> Arc<dyn JobBackend> {
    let mock = || -> Arc<dyn JobBackend> { Arc::new(mock::MockBackend::from_config(cfg)) };

    match cfg.effective_backend() {
        BackendKind::Mock => {
            tracing::info!("Initializing job backend in mock mode");
            mock()
        }
        BackendKind::Kubernetes => match kubernetes::KubernetesBackend::connect(cfg).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                tracing::error!("Failed to connect to Kubernetes API: {}", e);
                tracing::warn!("Falling back to mock mode");
                mock()
            }
        },
        BackendKind::Docker => match docker::DockerBackend::connect(cfg).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                tracing::error!("Failed to connect to Docker: {}", e);
                tracing::warn!("Falling back to mock mode");
                mock()
            }
        },
    }
}

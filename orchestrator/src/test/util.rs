//! Helpers shared by tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::{
    backend::{mock::MockBackend, BackendError, ConfigMapData, JobBackend, JobOutcome, JobSpec},
    config::{BackendKind, ServiceConfig},
    runner::RunnerService,
    server::AppState,
};

/// A call received by [`FakeBackend`].
#[derive(Debug, Clone)]
pub enum Call {
    CreateConfigMap(String, ConfigMapData),
    DeleteConfigMap(String),
    CreateJob(JobSpec),
    Wait(String),
}

/// A backend answering with preset names and outcomes, recording every call.
pub struct FakeBackend {
    kind: BackendKind,
    connected: bool,
    config_map_name: String,
    job_name: String,
    outcome: JobOutcome,
    fail_create_job: bool,
    fail_delete: bool,
    panic_on_create_job: bool,
    calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    pub fn new() -> FakeBackend {
        FakeBackend {
            kind: BackendKind::Kubernetes,
            connected: true,
            config_map_name: "test-config-map".into(),
            job_name: "test-job".into(),
            outcome: JobOutcome::succeeded(r#"{"status": "pass", "tests": []}"#),
            fail_create_job: false,
            fail_delete: false,
            panic_on_create_job: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn outcome(mut self, outcome: JobOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    pub fn failing_create_job(mut self) -> Self {
        self.fail_create_job = true;
        self
    }

    pub fn panicking_create_job(mut self) -> Self {
        self.panic_on_create_job = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn create_config_map(
        &self,
        name: &str,
        data: ConfigMapData,
    ) -> Result<String, BackendError> {
        self.record(Call::CreateConfigMap(name.into(), data));
        Ok(self.config_map_name.clone())
    }

    async fn delete_config_map(&self, name: &str) -> Result<(), BackendError> {
        self.record(Call::DeleteConfigMap(name.into()));
        if self.fail_delete {
            return Err(BackendError::Api {
                status: 404,
                message: "not found".into(),
            });
        }
        Ok(())
    }

    async fn create_job(&self, spec: JobSpec) -> Result<String, BackendError> {
        self.record(Call::CreateJob(spec));
        if self.panic_on_create_job {
            panic!("backend exploded");
        }
        if self.fail_create_job {
            return Err(BackendError::Api {
                status: 403,
                message: "jobs.batch is forbidden".into(),
            });
        }
        Ok(self.job_name.clone())
    }

    async fn wait_for_job_completion(&self, job_name: &str) -> Result<JobOutcome, BackendError> {
        self.record(Call::Wait(job_name.into()));
        Ok(self.outcome.clone())
    }
}

pub fn state_with_backend(cfg: ServiceConfig, backend: Arc<dyn JobBackend>) -> AppState {
    let cfg = Arc::new(cfg);
    let runner = Arc::new(RunnerService::new(backend, cfg.clone()));
    AppState::new(cfg, runner)
}

pub fn mock_state() -> AppState {
    state_with_backend(
        ServiceConfig::default(),
        Arc::new(MockBackend::new(Duration::ZERO)),
    )
}

/// A fresh directory, removed when the returned handle is dropped.
pub fn temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("orchestrator-test-")
        .tempdir()
        .unwrap()
}

pub const BOUNDARY: &str = "orchestrator-test-boundary";

/// Encode `(field, file name, content)` triples as a multipart body.
/// Returns the content type and the body.
pub fn multipart_body<C: AsRef<[u8]>>(parts: &[(&str, &str, C)]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (field, file_name, content) in parts {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(content.as_ref());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

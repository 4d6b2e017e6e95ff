//! Laying a test run out on a [`JobBackend`].
//!
//! This module doesn't know how jobs are executed. See [`crate::backend`] for
//! corresponding code.

use std::sync::Arc;

use err_derive::Error;
use serde_json::Value;
use tracing::instrument;

use crate::{
    backend::{BackendError, ConfigMapData, JobBackend, JobSpecBuilder, Volume, VolumeMount},
    config::{ServiceConfig, EXERCISE_MOUNT_PATH},
    util::short_id,
};

pub mod result;
mod validate;

pub use result::{interpret_job_logs, RunReport, RunStatus};
pub use validate::validate_test_config;

const VOLUME_NAME: &str = "test-files";
const CONFIG_FILE_NAME: &str = "test_config.json";

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(display = "Unsupported language: {}", _0)]
    UnsupportedLanguage(String),

    #[error(display = "{}", _0)]
    Backend(#[error(source)] BackendError),

    #[error(display = "JSON error: {}", _0)]
    Json(#[error(source)] serde_json::Error),
}

pub struct RunnerService {
    backend: Arc<dyn JobBackend>,
    cfg: Arc<ServiceConfig>,
}

impl RunnerService {
    pub fn new(backend: Arc<dyn JobBackend>, cfg: Arc<ServiceConfig>) -> RunnerService {
        RunnerService { backend, cfg }
    }

    pub fn backend(&self) -> &Arc<dyn JobBackend> {
        &self.backend
    }

    /// Run the tests described by `test_config` against `code`.
    ///
    /// # Error Handling
    ///
    /// Only an unsupported `language` is returned as `Err(_)`. Anything going
    /// wrong during the run is reported inside the returned JSON with
    /// `"status": "error"`.
    #[instrument(skip(self, code, test_config))]
    pub async fn run_tests(
        &self,
        language: &str,
        code: &str,
        test_config: &Value,
    ) -> Result<Value, RunnerError> {
        if self.cfg.language(language).is_none() {
            return Err(RunnerError::UnsupportedLanguage(language.to_owned()));
        }

        match self.run_job(language, code, test_config).await {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::error!("Error running tests: {}", e);
                Ok(RunReport::new(RunStatus::Error, format!("Error running tests: {}", e))
                    .into_value())
            }
        }
    }

    async fn run_job(
        &self,
        language: &str,
        code: &str,
        test_config: &Value,
    ) -> Result<Value, RunnerError> {
        let lang = self
            .cfg
            .language(language)
            .ok_or_else(|| RunnerError::UnsupportedLanguage(language.to_owned()))?;

        let run_id = short_id();
        let name = format!("{}-test-{}", language, run_id);
        let code_file_name = format!("solution.{}", lang.file_extension);

        let mut data = ConfigMapData::new();
        data.insert(code_file_name.clone(), code.to_owned());
        data.insert(CONFIG_FILE_NAME.into(), serde_json::to_string(test_config)?);

        let config_map = self.backend.create_config_map(&name, data).await?;

        let spec = JobSpecBuilder::default()
            .name(name)
            .image(lang.image.clone())
            .command(runner_command(&code_file_name))
            .volumes(vec![Volume {
                name: VOLUME_NAME.into(),
                config_map: config_map.clone(),
            }])
            .volume_mounts(vec![VolumeMount {
                name: VOLUME_NAME.into(),
                mount_path: EXERCISE_MOUNT_PATH.into(),
            }])
            .timeout(self.cfg.job_timeout(lang))
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        let outcome = match self.backend.create_job(spec).await {
            Ok(job) => self.backend.wait_for_job_completion(&job).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.backend.delete_config_map(&config_map).await {
            tracing::warn!("Failed to clean up ConfigMap: {}", e);
        }

        let outcome = outcome?;
        Ok(interpret_job_logs(outcome.success, &outcome.logs))
    }
}

/// The command copying the mounted files into place and starting the
/// test runner.
pub fn runner_command(code_file_name: &str) -> Vec<String> {
    vec![
        "sh".into(),
        "-c".into(),
        format!(
            "cd {mount} && \
             cp {code} /opt/test-runner/code/{code} && \
             cp {config} /opt/test-runner/config.json && \
             cd /opt/test-runner && \
             ./bin/run.sh /opt/test-runner/code /opt/test-runner/output",
            mount = EXERCISE_MOUNT_PATH,
            code = code_file_name,
            config = CONFIG_FILE_NAME,
        ),
    ]
}

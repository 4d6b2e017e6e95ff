//! Smoke test against a running orchestrator: a health check followed by
//! one test run.

use std::path::{Path, PathBuf};

use anyhow::Context;
use reqwest::multipart::{Form, Part};

#[derive(Debug, Clone)]
pub struct SmokeTestConfig {
    /// Base url of the orchestrator
    pub host: String,
    pub language: String,
    pub code_file: PathBuf,
    pub test_config: PathBuf,
}

/// One request made by the smoke test.
#[derive(Debug, Clone)]
pub struct SmokeResponse {
    pub request: String,
    pub status: u16,
    pub body: String,
}

impl std::fmt::Display for SmokeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} -> {}", self.request, self.status)?;
        write!(f, "{}", self.body)
    }
}

async fn file_part(path: &Path) -> anyhow::Result<Part> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".into());
    Ok(Part::bytes(content).file_name(file_name))
}

/// Run the smoke test. HTTP error statuses are reported, not treated as
/// failures. The health check runs before the upload files are read.
pub async fn run_smoke_test(cfg: &SmokeTestConfig) -> anyhow::Result<Vec<SmokeResponse>> {
    let client = reqwest::Client::new();
    let host = cfg.host.trim_end_matches('/');
    let mut responses = Vec::new();

    tracing::info!("Checking health of {}", host);
    let res = client
        .get(format!("{}/health", host))
        .send()
        .await
        .context("Health check request failed")?;
    responses.push(SmokeResponse {
        request: "GET /health".into(),
        status: res.status().as_u16(),
        body: res.text().await?,
    });

    let form = Form::new()
        .part("code_file", file_part(&cfg.code_file).await?)
        .part("test_config", file_part(&cfg.test_config).await?);
    let path = format!("/api/{}-test-runner/start", cfg.language);
    tracing::info!("Starting a test run at {}", path);
    let res = client
        .post(format!("{}{}", host, path))
        .multipart(form)
        .send()
        .await
        .context("Test run request failed")?;
    responses.push(SmokeResponse {
        request: format!("POST {}", path),
        status: res.status().as_u16(),
        body: res.text().await?,
    });

    Ok(responses)
}

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::{err::ApiError, AppState};
use crate::{
    config::{BackendKind, API_VERSION},
    runner::validate_test_config,
};

const RUNNER_PATH_SUFFIX: &str = "-test-runner";

/// API documentation.
pub async fn index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "Exercism Test Runner API",
        "description": "API service for orchestrating Exercism test runners",
        "endpoints": {
            "/health": {
                "method": "GET",
                "description": "Health check endpoint",
            },
            "/api/{language}-test-runner/start": {
                "method": "POST",
                "description": "Run tests for a specific language",
                "required_files": super::err::REQUIRED_FILES,
                "supported_languages": state.cfg.supported_languages(),
            },
        },
        "version": API_VERSION,
    }))
}

pub async fn health(State(state): State<AppState>) -> Response {
    let backend = state.runner.backend();
    let is_mock = backend.kind() == BackendKind::Mock;
    let is_connected = !is_mock && backend.is_connected().await;

    let client_status = if is_mock {
        "ok (mock mode)"
    } else if is_connected {
        "ok"
    } else {
        "error"
    };
    let body = Json(json!({
        "status": "ok",
        "kubernetes_client": client_status,
        "backend": backend.kind().as_str(),
        "supported_languages": state.cfg.supported_languages(),
        "api_version": API_VERSION,
    }));

    if !is_mock && !is_connected {
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    } else {
        body.into_response()
    }
}

/// Files of a start request.
#[derive(Debug, Default)]
struct Upload {
    code: Option<(Option<String>, Vec<u8>)>,
    test_config: Option<Vec<u8>>,
}

/// Bodies cut off by the upload limit keep their 413, anything else is the
/// client's malformed request.
fn upload_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::UploadTooLarge
    } else {
        ApiError::BadUpload(format!("Malformed upload: {}", e.body_text()))
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut upload = Upload::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(upload_error)?
    {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "code_file" => {
                let file_name = field.file_name().map(str::to_owned);
                let content = field
                    .bytes()
                    .await
                    .map_err(upload_error)?;
                upload.code = Some((file_name, content.to_vec()));
            }
            "test_config" => {
                let content = field
                    .bytes()
                    .await
                    .map_err(upload_error)?;
                upload.test_config = Some(content.to_vec());
            }
            other => tracing::debug!("Ignoring upload field {:?}", other),
        }
    }
    Ok(upload)
}

/// `POST /api/{language}-test-runner/start`
pub async fn start_run(
    State(state): State<AppState>,
    Path(runner): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let language = runner
        .strip_suffix(RUNNER_PATH_SUFFIX)
        .ok_or(ApiError::NotFound)?;

    if state.cfg.language(language).is_none() {
        return Err(ApiError::UnsupportedLanguage {
            language: language.to_owned(),
            supported: state.cfg.supported_languages(),
        });
    }

    let upload = match multipart {
        Ok(multipart) => read_upload(multipart).await?,
        Err(e) => {
            tracing::debug!("Request is not a multipart upload: {}", e);
            Upload::default()
        }
    };
    let ((code_file_name, code), test_config) = match (upload.code, upload.test_config) {
        (Some(code), Some(test_config)) => (code, test_config),
        _ => return Err(ApiError::MissingFiles),
    };

    let test_config: Value =
        serde_json::from_slice(&test_config).map_err(|_| ApiError::InvalidJson)?;
    if !validate_test_config(&test_config, language) {
        return Err(ApiError::InvalidConfig);
    }
    let code = String::from_utf8(code)
        .map_err(|_| ApiError::BadUpload("Code file must be UTF-8 text".into()))?;

    tracing::info!(file = ?code_file_name, "Starting test runner for {}", language);
    let result = state
        .runner
        .run_tests(language, &code, &test_config)
        .await
        .map_err(|e| {
            tracing::error!("Error running tests: {}", e);
            ApiError::RunFailed(e.to_string())
        })?;

    Ok(Json(result))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

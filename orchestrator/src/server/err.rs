use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use err_derive::Error;
use serde_json::json;

/// Field names every start request must carry.
pub const REQUIRED_FILES: [&str; 2] = ["code_file", "test_config"];

/// Errors answered to API clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(display = "Unsupported language: {}", language)]
    UnsupportedLanguage {
        language: String,
        supported: Vec<String>,
    },

    #[error(display = "Missing required files")]
    MissingFiles,

    #[error(display = "{}", _0)]
    BadUpload(String),

    #[error(display = "Upload too large")]
    UploadTooLarge,

    #[error(display = "Invalid JSON in test configuration")]
    InvalidJson,

    #[error(display = "Invalid test configuration")]
    InvalidConfig,

    #[error(display = "Error running tests: {}", _0)]
    RunFailed(String),

    #[error(display = "Resource not found")]
    NotFound,

    #[error(display = "Rate limit exceeded")]
    RateLimited,

    #[error(display = "Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnsupportedLanguage { .. }
            | ApiError::MissingFiles
            | ApiError::BadUpload(_)
            | ApiError::InvalidJson
            | ApiError::InvalidConfig => StatusCode::BAD_REQUEST,
            ApiError::UploadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::RunFailed(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();
        let body = match self {
            ApiError::UnsupportedLanguage { supported, .. } => json!({
                "error": error,
                "supported_languages": supported,
            }),
            ApiError::MissingFiles => json!({
                "error": error,
                "required": REQUIRED_FILES,
            }),
            _ => json!({ "error": error }),
        };
        (status, Json(body)).into_response()
    }
}

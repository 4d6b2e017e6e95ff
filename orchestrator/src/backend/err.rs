use err_derive::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(display = "Backend configuration error: {}", _0)]
    Config(String),

    #[error(display = "IO error: {}", _0)]
    Io(#[error(source)] std::io::Error),

    #[error(display = "Web request error: {}", _0)]
    Request(#[error(source)] reqwest::Error),

    #[error(display = "Kubernetes API returned {}: {}", status, message)]
    Api { status: u16, message: String },

    #[error(display = "Docker error: {}", _0)]
    Docker(#[error(source)] bollard::errors::Error),

    #[error(display = "JSON error: {}", _0)]
    Json(#[error(source)] serde_json::Error),

    #[error(display = "No such config map: {}", _0)]
    NoSuchConfigMap(String),
}

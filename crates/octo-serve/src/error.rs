use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum FileServerError {
    #[error("Path is outside root directory")]
    OutOfRoot,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0} is disabled")]
    FeatureDisabled(&'static str),

    #[error("Authentication required")]
    Unauthorized {
        /// Value for the `WWW-Authenticate` header, if the auth mode has a challenge.
        challenge: Option<String>,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            FileServerError::OutOfRoot => (StatusCode::FORBIDDEN, "OUT_OF_ROOT"),
            FileServerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            FileServerError::FeatureDisabled(_) => {
                (StatusCode::METHOD_NOT_ALLOWED, "FEATURE_DISABLED")
            }
            FileServerError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            FileServerError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            FileServerError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            FileServerError::NotEmpty(_) => (StatusCode::CONFLICT, "NOT_EMPTY"),
            FileServerError::RangeNotSatisfiable { .. } => {
                (StatusCode::RANGE_NOT_SATISFIABLE, "RANGE_NOT_SATISFIABLE")
            }
            FileServerError::InvalidPath(_) => (StatusCode::BAD_REQUEST, "INVALID_PATH"),
            FileServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            FileServerError::FileTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE")
            }
            FileServerError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED")
            }
            FileServerError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

/// Map a filesystem error onto the taxonomy, keeping "not found" distinct from
/// unexpected failures.
pub(crate) fn io_to_error(err: std::io::Error, what: &str) -> FileServerError {
    match err.kind() {
        // A file used as a directory component means the path does not exist
        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory => {
            FileServerError::NotFound(what.to_string())
        }
        std::io::ErrorKind::PermissionDenied => FileServerError::Forbidden(what.to_string()),
        _ => FileServerError::Io(err),
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for FileServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        match &self {
            FileServerError::OutOfRoot => warn!("Rejected suspicious path outside root"),
            FileServerError::Io(err) => error!("IO failure while serving request: {}", err),
            _ => {}
        }

        let mut headers = HeaderMap::new();
        match &self {
            FileServerError::Unauthorized {
                challenge: Some(challenge),
            } => {
                if let Ok(value) = HeaderValue::from_str(challenge) {
                    headers.insert(header::WWW_AUTHENTICATE, value);
                }
            }
            FileServerError::RangeNotSatisfiable { size } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };

        (status, headers, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_carries_challenge() {
        let response = FileServerError::Unauthorized {
            challenge: Some("Basic realm=\"files\"".to_string()),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"files\""
        );
    }

    #[test]
    fn test_range_error_reports_size() {
        let response = FileServerError::RangeNotSatisfiable { size: 10 }.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */10"
        );
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = io_to_error(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "a.txt",
        );
        assert!(matches!(err, FileServerError::NotFound(ref p) if p == "a.txt"));
    }

    #[test]
    fn test_io_not_a_directory_maps_to_not_found() {
        let err = io_to_error(
            std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
            "a.txt/child",
        );
        assert!(matches!(err, FileServerError::NotFound(ref p) if p == "a.txt/child"));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use reyestr_db::DbError;

/// The standardized error returned by the dispatcher.
#[derive(thiserror::Error, Debug)]
pub enum HostError {
    /// For request validation failures.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// For request validation failures carrying structured details.
    #[error("invalid request: {0}")]
    BadRequestDetailed(String, serde_json::Value),

    /// For missing or invalid credentials.
    #[error("missing or invalid credentials")]
    Unauthorized,

    /// For authenticated callers lacking the required role.
    #[error("not permitted: {0}")]
    Forbidden(String),

    /// For absent referenced entities.
    #[error("{0} not found")]
    NotFound(String),

    /// For state-machine rejections.
    #[error("{0}")]
    Conflict(String),

    /// For exceeded request deadlines.
    #[error("request deadline exceeded")]
    Timeout,

    /// For an exhausted pool or lost store connection.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// For invalid process configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// For a required but unreachable cache.
    #[error("cache unavailable: {0}")]
    Cache(String),

    /// For I/O errors.
    #[error("there was an I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// For serde errors.
    #[error("there was a deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A catch-all error for any other error type.
    #[error("there was an unexpected error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// The error envelope every failing response carries.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<DbError> for HostError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound(what) => HostError::NotFound(what.to_string()),
            DbError::Conflict(message) => HostError::Conflict(message),
            DbError::Unavailable(message) => HostError::StoreUnavailable(message),
            DbError::Timeout => HostError::Timeout,
            DbError::Serde(error) => HostError::Serde(error),
            DbError::Corruption(message) => HostError::Anyhow(anyhow::anyhow!(message)),
        }
    }
}

impl HostError {
    fn kind_and_status(&self) -> (&'static str, StatusCode) {
        match self {
            HostError::BadRequest(_) | HostError::BadRequestDetailed(..) => {
                ("BadRequest", StatusCode::BAD_REQUEST)
            }
            HostError::Unauthorized => ("Unauthorized", StatusCode::UNAUTHORIZED),
            HostError::Forbidden(_) => ("Forbidden", StatusCode::FORBIDDEN),
            HostError::NotFound(_) => ("NotFound", StatusCode::NOT_FOUND),
            HostError::Conflict(_) => ("Conflict", StatusCode::CONFLICT),
            HostError::Timeout => ("Timeout", StatusCode::REQUEST_TIMEOUT),
            HostError::StoreUnavailable(_) => {
                ("StoreUnavailable", StatusCode::SERVICE_UNAVAILABLE)
            }
            HostError::Config(_)
            | HostError::Cache(_)
            | HostError::Io(_)
            | HostError::Serde(_)
            | HostError::Anyhow(_) => ("Internal", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Process exit code for startup failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            HostError::StoreUnavailable(_) | HostError::Timeout => 2,
            HostError::Cache(_) => 3,
            _ => 1,
        }
    }

    /// Attach structured details to a validation error.
    pub fn bad_request_with(message: impl Into<String>, details: serde_json::Value) -> HostError {
        HostError::BadRequestDetailed(message.into(), details)
    }
}

impl IntoResponse for HostError {
    fn into_response(self) -> axum::response::Response {
        let (kind, status) = self.kind_and_status();
        let details = match &self {
            HostError::BadRequestDetailed(_, details) => Some(details.clone()),
            _ => None,
        };
        let envelope = ErrorEnvelope {
            kind: kind.to_string(),
            message: self.to_string(),
            details,
        };
        (status, Json(envelope)).into_response()
    }
}

/// A type alias for the standardized result type returned by the host.
pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_http_statuses() {
        let cases = [
            (
                HostError::BadRequest("x".into()).kind_and_status(),
                ("BadRequest", StatusCode::BAD_REQUEST),
            ),
            (
                HostError::Unauthorized.kind_and_status(),
                ("Unauthorized", StatusCode::UNAUTHORIZED),
            ),
            (
                HostError::Conflict("x".into()).kind_and_status(),
                ("Conflict", StatusCode::CONFLICT),
            ),
            (
                HostError::Timeout.kind_and_status(),
                ("Timeout", StatusCode::REQUEST_TIMEOUT),
            ),
            (
                HostError::StoreUnavailable("x".into()).kind_and_status(),
                ("StoreUnavailable", StatusCode::SERVICE_UNAVAILABLE),
            ),
        ];
        for (got, want) in cases {
            assert_eq!(got, want);
        }
    }

    #[test]
    fn startup_exit_codes() {
        assert_eq!(HostError::Config("x".into()).exit_code(), 1);
        assert_eq!(HostError::StoreUnavailable("x".into()).exit_code(), 2);
        assert_eq!(HostError::Cache("x".into()).exit_code(), 3);
    }
}

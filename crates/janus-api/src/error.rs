use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use janus_types::JanusError;

/// Handler failure. Domain errors pick their own status; `Status` and
/// `Rejected` are for edge checks that have no domain meaning.
#[derive(Debug)]
pub enum ApiError {
    Janus(JanusError),
    Status(StatusCode),
    Rejected(StatusCode, &'static str),
}

impl From<JanusError> for ApiError {
    fn from(err: JanusError) -> Self {
        Self::Janus(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Janus(err.into())
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        Self::Status(status)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::Status(status) => return status.into_response(),
            Self::Rejected(status, message) => return (status, message).into_response(),
            Self::Janus(err) => err,
        };

        match err {
            // Which check failed is never revealed.
            JanusError::InvalidCredentials | JanusError::TokenNotFoundOrExpired => {
                StatusCode::UNAUTHORIZED.into_response()
            }
            JanusError::EventNotFound | JanusError::ParticipantNotFound => {
                (StatusCode::NOT_FOUND, err.to_string()).into_response()
            }
            JanusError::EventNotOpen => (StatusCode::CONFLICT, err.to_string()).into_response(),
            JanusError::InvalidUpdateValue(_) | JanusError::InvalidEventWindow => {
                (StatusCode::BAD_REQUEST, err.to_string()).into_response()
            }
            JanusError::LimitReached(_) => (StatusCode::FORBIDDEN, err.to_string()).into_response(),
            JanusError::DuplicateKeyCollision { .. } | JanusError::StorageCommitFailure(_) => {
                error!("Request failed: {:#}", err);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Run blocking storage work off the async runtime.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Status(StatusCode::INTERNAL_SERVER_ERROR)
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn credential_failures_are_unauthorized() {
        assert_eq!(status(JanusError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status(JanusError::TokenNotFoundOrExpired), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn caller_errors_map_to_client_statuses() {
        assert_eq!(status(JanusError::EventNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(JanusError::InvalidEventWindow), StatusCode::BAD_REQUEST);
        assert_eq!(status(JanusError::LimitReached("x")), StatusCode::FORBIDDEN);
        assert_eq!(status(JanusError::EventNotOpen), StatusCode::CONFLICT);
    }

    #[test]
    fn typed_errors_inside_anyhow_keep_their_status() {
        let wrapped = anyhow::Error::from(JanusError::LimitReached("participants per free event"));
        assert_eq!(status(wrapped), StatusCode::FORBIDDEN);
        assert_eq!(
            status(anyhow::anyhow!("disk full")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

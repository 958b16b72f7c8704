use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use dispatch::polling::DispatchError;

/// A request that could not be served. The user-input/internal split from
/// the dispatch core carries through to the status code.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("{0}")]
    BadRequest(String),

    #[error("404 page not found")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

impl WebError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        WebError::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        WebError::Internal(message.into())
    }
}

impl From<DispatchError> for WebError {
    fn from(err: DispatchError) -> Self {
        if err.is_user_error() {
            WebError::BadRequest(err.to_string())
        } else {
            WebError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::NotFound => StatusCode::NOT_FOUND,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(%self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

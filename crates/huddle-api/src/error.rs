use axum::http::StatusCode;
use tracing::error;

use huddle_types::error::ChatError;

pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::Unauthorized => StatusCode::UNAUTHORIZED,
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Conflict => StatusCode::CONFLICT,
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turn a store failure into the handler's rejection. Storage failures are
/// logged here since their detail never reaches the client.
pub fn reject(err: ChatError) -> StatusCode {
    if let ChatError::Storage(detail) = &err {
        error!("storage error: {}", detail);
    }
    status_for(&err)
}

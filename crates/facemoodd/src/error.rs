use crate::engine::EngineError;
use crate::render;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use facemood_auth::StoreError;
use thiserror::Error;

/// Failures that end a request with an error page instead of a view.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("user store: {0}")]
    Store(#[from] StoreError),
    #[error("detection engine: {0}")]
    Engine(#[from] EngineError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Engine(EngineError::ChannelClosed) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) | AppError::Engine(_) | AppError::Io(_) | AppError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text safe to show to the browser. Internal failures stay generic.
    fn public_message(&self) -> String {
        match self {
            AppError::Forbidden(msg) | AppError::BadRequest(msg) => msg.clone(),
            _ => "Something went wrong while handling your request. Please try again later."
                .to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        } else {
            tracing::warn!(status = %status, error = %self, "request rejected");
        }
        (status, render::error_page(status, &self.public_message())).into_response()
    }
}

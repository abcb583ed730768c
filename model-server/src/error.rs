//! Server error taxonomy and its HTTP mapping.

use array_codec::CodecError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Errors that can occur while starting the server or serving a prediction
#[derive(Error, Debug)]
pub enum ServerError {
    /// Fatal at startup: the model or environment cannot be served.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Maximal number of prediction requests exceeded: {remaining}")]
    RateExceeded { remaining: i64 },

    #[error("Missing required argument: {0}")]
    Binding(String),

    /// The caller sent an image the model cannot accept.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The model broke its output contract.
    #[error("Model contract violated: {0}")]
    ModelContract(String),

    #[error("Failed to decode request body: {0}")]
    Decode(#[from] CodecError),

    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Model failed: {0}")]
    Model(String),

    #[error("Not running with a server that can be shut down")]
    ShutdownUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::RateExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Binding(_)
            | Self::Validation(_)
            | Self::Decode(_)
            | Self::Image(_)
            | Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_)
            | Self::ModelContract(_)
            | Self::Model(_)
            | Self::ShutdownUnavailable
            | Self::Internal(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ServerError {
    /// Errors already logged where they were raised.
    pub(crate) const fn logged_at_source(&self) -> bool {
        matches!(self, Self::RateExceeded { .. })
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if !self.logged_at_source() {
            if status.is_server_error() {
                error!(status = status.as_u16(), error = %self, "Request failed");
            } else {
                warn!(status = status.as_u16(), error = %self, "Request rejected");
            }
        }
        (status, self.to_string()).into_response()
    }
}

use axum::http::StatusCode;
use tracing::{error, warn};

use crate::images::ImageError;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Session not found")]
    SessionNotFound,
    #[error("Please enter your ID.")]
    MissingIdentity,
    #[error("ID already set for this session")]
    IdentityLocked,
    #[error("No image found. Please upload an image first.")]
    MissingImage,
    #[error("No analysis data found. Please analyze the image first.")]
    MissingResult,
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("nutrition analysis failed: {0:#}")]
    Model(#[source] anyhow::Error),
    #[error("writing to the log failed: {0:#}")]
    Log(#[source] anyhow::Error),
}

impl FlowError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::MissingIdentity => StatusCode::PRECONDITION_REQUIRED,
            Self::IdentityLocked | Self::MissingImage | Self::MissingResult => StatusCode::CONFLICT,
            Self::Image(_) => StatusCode::BAD_REQUEST,
            Self::Model(_) | Self::Log(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Precondition failures are reported to the user; external failures fail the action.
pub fn reject(e: FlowError) -> (StatusCode, String) {
    let status = e.status();
    if status.is_server_error() {
        error!(error = %e, %status, "action failed");
    } else {
        warn!(error = %e, %status, "action rejected");
    }
    (status, e.to_string())
}

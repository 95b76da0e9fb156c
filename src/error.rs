//! Error types shared by the gallery engine and its remote collaborators.

use thiserror::Error;

use crate::models::RecordId;

/// Failures surfaced by the remote service or the engine's own plumbing.
///
/// The engine never shows these to the user itself; it only guarantees that
/// its internal state is consistent (rolled back or invalidated) after one.
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned status {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode {endpoint} response: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("remote service unavailable: {0}")]
    Unavailable(String),

    #[error("record {0} not found")]
    NotFound(RecordId),
}

impl GalleryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// True for failures worth retrying on the next natural trigger.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Unavailable(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode { .. } | Self::Url(_) | Self::NotFound(_) => false,
        }
    }
}

pub type GalleryResult<T> = Result<T, GalleryError>;

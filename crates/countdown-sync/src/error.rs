use tab_bus::BusError;
use tab_store::StoreError;
use thiserror::Error;

/// Rejection of an uploaded image. Every variant leaves the tab unchanged.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("only JPG and PNG images are allowed (got {mime})")]
    UnsupportedType { mime: String },
    #[error("image is too large: {size} bytes (maximum {max} bytes)")]
    TooLarge { size: usize, max: usize },
    #[error(
        "image must be exactly {expected_width}x{expected_height}px; yours is {actual_width}x{actual_height}px"
    )]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("could not read image: {0}")]
    Decode(String),
    #[error("could not save image: {0}")]
    Store(#[from] StoreError),
}

impl ImageError {
    /// True for the type, size and dimension checks.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ImageError::UnsupportedType { .. }
                | ImageError::TooLarge { .. }
                | ImageError::DimensionMismatch { .. }
        )
    }
}

#[derive(Debug, Clone, Error)]
#[error("audio playback blocked: {reason}")]
pub struct PlaybackBlocked {
    pub reason: String,
}

impl PlaybackBlocked {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed sync message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum TabError {
    #[error("tab is shut down")]
    Closed,
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("tab task failed: {0}")]
    Task(String),
}

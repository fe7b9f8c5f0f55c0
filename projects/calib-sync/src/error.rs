use thiserror::Error;

/// Which way a calibration scan was walking when it ran out of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl std::fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanDirection::Forward => write!(f, "forward"),
            ScanDirection::Backward => write!(f, "backward"),
        }
    }
}

/// Errors produced while computing synchronized ranges
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No frame with a detectable calibration pattern in {stream} ({direction} scan)")]
    PatternNotFound {
        stream: String,
        direction: ScanDirection,
    },

    #[error("Streams share no usable window: post-offset bounds ({lo}, {hi}) are inverted")]
    DegenerateRange { lo: i64, hi: i64 },

    #[error("No matching audio between {reference} and {stream}")]
    AudioMismatch { reference: String, stream: String },

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

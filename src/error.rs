use thiserror::Error;

pub const ERR_URLS: &str = "Error in URLs";
pub const ERR_FIRST_TRACK: &str = "FirstTrack is nil";
pub const ERR_VIDEO_TRACKS: &str = "Failed to load tracks";
pub const ERR_AUDIO_TRACK: &str = "Failed to load Audio track";
pub const ERR_EXPORTER: &str = "Error in exporter";
pub const ERR_FINAL_URL: &str = "Error in finalUrl";
pub const ERR_BUSY: &str = "Busy";
pub const ERR_CANCELLED: &str = "Cancelled";
pub const ERR_DROPPED: &str = "Request dropped";
pub const ERR_CONFIG: &str = "Invalid config";

/// Every way a merge request can end without an output file.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Unparsable or missing input, caught before any I/O.
    #[error("{reason}: {detail}")]
    Validation { reason: &'static str, detail: String },

    /// A required track is missing or a range cannot be placed on the timeline.
    #[error("{reason}: {detail}")]
    Track { reason: &'static str, detail: String },

    #[error("export failed: {0}")]
    Export(String),

    #[error("transcode setup failed: {0}")]
    TranscodeInit(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("another merge is already running")]
    Busy,

    #[error("merge cancelled")]
    Cancelled,

    #[error("request dropped before a result was delivered")]
    Dropped,

    #[error("invalid config: {0}")]
    Config(String),
}

impl MergeError {
    pub fn validation(reason: &'static str, detail: impl Into<String>) -> Self {
        Self::Validation {
            reason,
            detail: detail.into(),
        }
    }

    pub fn track(reason: &'static str, detail: impl Into<String>) -> Self {
        Self::Track {
            reason,
            detail: detail.into(),
        }
    }

    /// Short caller-facing reason, the only thing the error callback receives.
    pub fn reason(&self) -> &'static str {
        match self {
            MergeError::Validation { reason, .. } | MergeError::Track { reason, .. } => reason,
            MergeError::Export(_) => ERR_EXPORTER,
            MergeError::TranscodeInit(_) | MergeError::Transcode(_) => ERR_FINAL_URL,
            MergeError::Busy => ERR_BUSY,
            MergeError::Cancelled => ERR_CANCELLED,
            MergeError::Dropped => ERR_DROPPED,
            MergeError::Config(_) => ERR_CONFIG,
        }
    }
}

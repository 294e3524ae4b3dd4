//! Error types for the photo relay.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Messaging channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to download file {file_id} from channel {name}: {reason}")]
    DownloadFailed {
        name: String,
        file_id: String,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Pixel transform errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("Incompatible dimensions: {left_rows}x{left_cols} vs {right_rows}x{right_cols} ({axis})")]
    IncompatibleDimensions {
        axis: &'static str,
        left_rows: usize,
        left_cols: usize,
        right_rows: usize,
        right_cols: usize,
    },

    #[error("Invalid kernel size {kernel} for a {rows}x{cols} image")]
    InvalidKernelSize {
        kernel: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Row {row} has {found} samples, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Image decode / encode errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Empty image payload")]
    EmptyInput,

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Image too large to encode: {rows}x{cols}")]
    TooLarge { rows: usize, cols: usize },
}

/// Object detection adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Detection service unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid response from detection service: {reason}")]
    InvalidResponse { reason: String },
}

/// Object storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable for key {key}: {reason}")]
    Unavailable { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-event dispatch errors. All of these end as a text reply to the user.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Group {group_id} has no declared filter")]
    GroupIncomplete { group_id: String },

    #[error("Unknown group filter '{filter}'")]
    UnknownGroupFilter { filter: String },

    #[error("Filter {filter} needs at least {needed} photos, got {got}")]
    NotEnoughPhotos {
        filter: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("Resource {resource} is busy")]
    ResourceBusy { resource: &'static str },

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Detection(#[from] DetectionError),
}

impl DispatchError {
    /// Text shown to the user when this error ends an event.
    pub fn user_message(&self) -> String {
        match self {
            Self::GroupIncomplete { .. } => {
                "You need to choose a filter. Add a caption such as 'concat' to one of the photos."
                    .to_string()
            }
            Self::UnknownGroupFilter { filter } => {
                format!("Unknown group filter '{filter}'. Try 'concat'.")
            }
            Self::NotEnoughPhotos { filter, needed, .. } => {
                format!("The '{filter}' filter needs at least {needed} photos.")
            }
            Self::ResourceBusy { .. } => {
                "Already processing an image. Please wait and try again.".to_string()
            }
            Self::Transform(TransformError::IncompatibleDimensions { .. }) => {
                "Images have incompatible dimensions for concatenation.".to_string()
            }
            Self::Transform(TransformError::InvalidKernelSize { .. }) => {
                "The image is too small for this filter. Please try a larger photo.".to_string()
            }
            Self::Transform(_) | Self::Codec(_) | Self::Task(_) => {
                "An error occurred while applying the filter. Please try again.".to_string()
            }
            Self::Channel(_) => "Failed to download the image. Please try again.".to_string(),
            Self::Detection(_) => {
                "Failed to process the image with object detection. Please try again later."
                    .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_message_asks_to_retry() {
        let msg = DispatchError::ResourceBusy {
            resource: "detection",
        }
        .user_message();
        assert!(msg.contains("try again"));
    }

    #[test]
    fn failures_mention_retry() {
        let errors = [
            DispatchError::Task("panicked".into()),
            DispatchError::Codec(CodecError::EmptyInput),
            DispatchError::Detection(DetectionError::Unavailable {
                reason: "timeout".into(),
            }),
        ];
        for err in errors {
            let msg = err.user_message().to_lowercase();
            assert!(msg.contains("try again") || msg.contains("failed"), "{msg}");
        }
    }
}

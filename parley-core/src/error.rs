use thiserror::Error;

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("no microphone found")]
    DeviceNotFound,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed audio payload: {0}")]
    Codec(String),

    #[error("session is already active")]
    AlreadyActive,

    #[error("session is not connected")]
    NotConnected,

    #[error("resource already released: {0}")]
    ResourceTeardown(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// The single human-readable line shown to the user for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied(_) => {
                "Microphone access was denied. Allow microphone access for this app \
                 and start the session again."
                    .into()
            }
            Self::DeviceNotFound => {
                "No microphone was found. Connect a microphone and start the session again."
                    .into()
            }
            Self::AudioDevice(detail) | Self::AudioStream(detail) => {
                format!("The audio device could not be used: {detail}")
            }
            Self::Transport(detail) => format!("Connection error: {detail}"),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_and_missing_device_messages_are_distinct() {
        let denied = ParleyError::PermissionDenied("NotAllowedError".into()).user_message();
        let missing = ParleyError::DeviceNotFound.user_message();
        assert_ne!(denied, missing);
        assert!(denied.contains("denied"));
        assert!(missing.contains("No microphone"));
    }

    #[test]
    fn transport_message_carries_detail() {
        let msg = ParleyError::Transport("quota exceeded".into()).user_message();
        assert_eq!(msg, "Connection error: quota exceeded");
    }
}

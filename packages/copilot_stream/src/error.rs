use std::time::Duration;

/// Errors raised by a [`Channel`](crate::channel::Channel).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,

    #[error("another session already owns this channel's inbound stream")]
    HandlerBusy,
}

/// A single inbound frame could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("malformed stream frame: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Errors surfaced at the `ask` boundary.
#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("another question is still in flight on this channel")]
    Busy,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to get the response back within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("ask cancelled")]
    Cancelled,

    #[error("copilot reported an error: {0}")]
    Service(String),

    #[error("failed to encode question: {0}")]
    Encode(#[from] serde_json::Error),
}

impl AskError {
    /// Timeouts and lost connections both mean the answer never made it back.
    pub fn is_connection_class(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_display() {
        assert_eq!(
            ChannelError::NotConnected.to_string(),
            "channel is not connected"
        );
    }

    #[test]
    fn timeout_display_mentions_response() {
        let err = AskError::Timeout(Duration::from_secs(60));
        assert_eq!(
            err.to_string(),
            "failed to get the response back within 60s"
        );
        assert!(err.is_connection_class());
    }

    #[test]
    fn service_and_busy_are_not_connection_class() {
        assert!(!AskError::Busy.is_connection_class());
        assert!(!AskError::Service("boom".into()).is_connection_class());
        assert!(!AskError::Cancelled.is_connection_class());
    }

    #[test]
    fn decode_error_wraps_serde() {
        let inner = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = DecodeError::from(inner);
        assert!(err.to_string().starts_with("malformed stream frame"));
    }
}

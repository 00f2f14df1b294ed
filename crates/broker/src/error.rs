//! Error types for the broker crate.

use message_bus::PubSubError;
use thiserror::Error;

/// Errors raised while routing external messages.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No decoder is registered for the channel.
    #[error("No route for channel {0}")]
    NoRoute(String),

    /// The payload did not decode into the channel's message type.
    #[error("Could not decode message on {channel}: {source}")]
    Decode {
        channel: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Pub/sub error: {0}")]
    PubSub(#[from] PubSubError),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_names_the_channel() {
        let source = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = BrokerError::Decode {
            channel: "change_batch_quantity".to_string(),
            source,
        };
        assert!(err.to_string().starts_with("Could not decode message on change_batch_quantity"));
    }

    #[test]
    fn pubsub_errors_convert() {
        let err: BrokerError = PubSubError::Closed.into();
        assert!(matches!(err, BrokerError::PubSub(PubSubError::Closed)));
    }
}

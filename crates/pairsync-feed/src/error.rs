/// Errors that can occur in the change-feed layer.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The underlying transport could not open a channel. The feed does not
    /// retry; the caller decides whether to subscribe again.
    #[error("channel setup failed for {topic}: {reason}")]
    ChannelSetup { topic: String, reason: String },

    /// An outbound broadcast could not be delivered.
    #[error("broadcast failed: {0}")]
    SendFailed(String),

    /// The channel was closed.
    #[error("channel closed: {0}")]
    Closed(String),
}

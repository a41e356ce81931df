//! Error types for the engine.
//!
//! [`EngineError`] is the top-level error propagated from `main`.
//! [`BusError`] covers transport failures and [`MessageError`] covers
//! payloads that cannot be encoded or decoded.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: h2chain_core::config::ConfigError,
    },

    /// Tick clock initialization or advance failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: h2chain_core::clock::ClockError,
    },

    /// The bus could not be reached or a subscription failed.
    #[error("bus error: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: BusError,
    },

    /// A startup message could not be encoded.
    #[error("message error: {source}")]
    Message {
        /// The underlying message error.
        #[from]
        source: MessageError,
    },
}

/// Transport failures.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Connecting to the broker failed.
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// Broker URL.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// Subscribing to a subject failed.
    #[error("failed to subscribe to {topic}: {message}")]
    Subscribe {
        /// Subject pattern.
        topic: String,
        /// Description of the failure.
        message: String,
    },

    /// Publishing to a subject failed.
    #[error("failed to publish to {topic}: {message}")]
    Publish {
        /// Subject.
        topic: String,
        /// Description of the failure.
        message: String,
    },

    /// Flushing pending messages failed.
    #[error("flush failed: {message}")]
    Flush {
        /// Description of the failure.
        message: String,
    },
}

/// Payload encode and decode failures.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// JSON payload did not match the expected shape.
    #[error("malformed payload on {topic}: {source}")]
    Decode {
        /// Subject the payload arrived on.
        topic: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// A message could not be serialized.
    #[error("failed to encode payload for {topic}: {source}")]
    Encode {
        /// Destination subject.
        topic: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// A plain-text control payload was not valid.
    #[error("invalid text payload on {topic}: {value}")]
    Text {
        /// Subject the payload arrived on.
        topic: String,
        /// Offending payload, lossily decoded.
        value: String,
    },
}

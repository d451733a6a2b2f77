use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Bad user input; never reaches the backend.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Backend or config unusable without operator action.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Backend accepted the request but produced no usable stream.
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Broken internal invariant.
    #[error("Programmer error: {0}")]
    Programmer(#[from] ProgrammerError),
}

impl Error {
    /// Returns the taxonomy name reported as `errorType` in telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::Configuration(_) => "ConfigurationError",
            Error::Generation(_) => "GenerationError",
            Error::Programmer(_) => "ProgrammerError",
        }
    }

    /// Returns the inner error text, without the category prefix.
    ///
    /// This is what a session stores as its `last_error`.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(e) => e.to_string(),
            Error::Configuration(e) => e.to_string(),
            Error::Generation(e) => e.to_string(),
            Error::Programmer(e) => e.to_string(),
        }
    }
}

/// User input validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Message text is empty after trimming.
    #[error("Message cannot be empty.")]
    EmptyMessage,

    /// Message text exceeds the composer ceiling.
    #[error("Message must be under {max} characters.")]
    MessageTooLong { max: usize },

    /// Model id is not part of the catalog.
    #[error("Please select a model. Unknown model: {0}")]
    UnknownModel(String),

    /// A history entry has no content.
    #[error("History message {index} content cannot be empty.")]
    EmptyHistoryEntry { index: usize },

    /// A history entry exceeds the per-entry ceiling.
    #[error("History message {index} must be under {max} characters.")]
    HistoryEntryTooLong { index: usize, max: usize },

    /// The history sent with a request is too long.
    #[error("Conversation history must contain at most {max} messages.")]
    TooManyHistoryMessages { max: usize },

    /// A generation is still in flight for this session.
    #[error("A response is still streaming. Wait for it to finish before sending another message.")]
    SessionBusy,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A required credential was not provided.
    #[error("{0} is not configured. Add it to your environment to enable streaming responses.")]
    MissingCredential(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Generation backend and streaming errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Remote API failure.
    #[error("{0}")]
    Api(String),

    /// The producer failed mid-stream.
    #[error("{0}")]
    Stream(String),

    /// Provider throttled the request.
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Waited too long for the response or the next increment.
    #[error("request timed out")]
    Timeout,

    /// The stream completed without any text.
    #[error("No content received from the AI. Please check your API configuration and try again.")]
    EmptyResponse,
}

/// Internal invariant violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgrammerError {
    /// A message with this id is already in the transcript.
    #[error("Duplicate message id: {0}")]
    DuplicateMessageId(String),

    /// A generation was started while another one is still active.
    #[error("Generation {active} is still active")]
    GenerationInProgress { active: String },
}

/// Telemetry sink errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The sink could not accept the event.
    #[error("Telemetry sink unavailable: {0}")]
    Unavailable(String),
}

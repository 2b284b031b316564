//! Result and error types shared by handlers and the runtime.

/// Result type for capability handlers.
pub type HandlerResult = Result<serde_json::Value, HandlerError>;

/// Errors a handler body can produce.
///
/// The dispatcher never lets one of these escape: every variant resolves
/// to a `failed` execution whose error string is this `Display` output.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("invalid_input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Failed(String),
    /// A nested local call failed.
    #[error("call to {capability} failed: {message}")]
    Call { capability: String, message: String },
    /// The result did not match the capability's output schema.
    #[error("invalid_output: {0}")]
    InvalidOutput(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        HandlerError::Failed(format!("{e:#}"))
    }
}

/// Typed-input decoding failures are the caller's fault.
impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::InvalidInput(e.to_string())
    }
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum SdkError {
    #[error("capability not found: {0}")]
    NotFound(String),
    #[error("capability already registered: {0}")]
    DuplicateCapability(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("invalid schema for {capability}: {message}")]
    InvalidSchema { capability: String, message: String },
    /// The coordinator could not be reached.
    #[error("registration: {0}")]
    Registration(String),
    /// The coordinator answered with a non-success status.
    #[error("coordinator rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    /// A cross-node call reached the coordinator but did not succeed.
    #[error("remote execution: {0}")]
    Remote(String),
    #[error("config: {0}")]
    Config(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

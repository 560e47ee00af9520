use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Malformed conversation: {0}")]
    MalformedConversation(String),

    #[error("Invalid arguments for tool call {tool_call_id}: {message}")]
    InvalidToolArguments {
        tool_call_id: String,
        message: String,
    },

    #[error("Model configuration error: {0}")]
    Configuration(String),

    #[error("Model request failed: {0}")]
    Request(String),

    #[error("Unexpected model behavior: {0}")]
    UnexpectedModelBehavior(String),

    #[error("Model requests are not allowed, the request gate is closed")]
    RequestsDisabled,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl ModelError {
    /// Errors that abort the whole in-flight request, as opposed to being
    /// scoped to a single part or turn.
    pub fn is_request_fatal(&self) -> bool {
        !matches!(
            self,
            ModelError::InvalidToolArguments { .. } | ModelError::MalformedConversation(_)
        )
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Request(err.to_string())
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid parameters: {0}")]
    Validation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Could not extract an action plan from model response: {0}")]
    ModelResponseParse(String),

    #[error("Blocked by security policy: {0}")]
    SecurityPolicyViolation(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Language model error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Anyhow error: {0}")]
    Anyhow(String),
}

/// Programmer errors raised by the action registry. These are never encoded
/// in an `ActionResult`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action '{0}' is already registered")]
    DuplicateAction(String),

    #[error("action '{0}' is not registered")]
    UnknownAction(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

// headless_chrome reports everything as anyhow::Error
impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Anyhow(err.to_string())
    }
}

impl AgentError {
    pub fn browser<E: std::fmt::Display>(err: E) -> Self {
        AgentError::Browser(err.to_string())
    }
}

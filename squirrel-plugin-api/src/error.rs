//! Error types for plugin authors

use thiserror::Error;

/// Errors that plugin hooks can return
#[derive(Error, Debug)]
pub enum PluginError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Initialization hook failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Shutdown hook failed
    #[error("Shutdown failed: {0}")]
    Shutdown(String),

    /// A required host service was not registered
    #[error("Service not available: {0}")]
    MissingService(String),

    /// Unknown action dispatch
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Plugin code panicked; the payload message is preserved
    #[error("Plugin panicked: {0}")]
    Panicked(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an initialization error
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    /// Whether this error came from a cancelled operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

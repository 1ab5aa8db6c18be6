//! Error types for the drsync library

use std::path::PathBuf;

/// Result type alias for drsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type shared by the differ, the collaborators and the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// A sync operation or root path was rejected before dispatch
    #[error("Invalid sync request: {0}")]
    Validation(String),

    /// The executor could not be invoked or returned an unusable body.
    /// Nothing in the batch can be assumed to have been applied.
    #[error("Sync executor failed: {0}")]
    Transport(String),

    /// The tree provider could not produce a listing
    #[error("Tree provider failed for '{root}': {message}")]
    Provider { root: String, message: String },

    /// A sync was requested before any comparison was loaded
    #[error("No comparison loaded; call load() first")]
    NotLoaded,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML encode errors
    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

impl SyncError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new provider error
    pub fn provider(root: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            root: root.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

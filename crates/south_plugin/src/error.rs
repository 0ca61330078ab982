//! Error types for plugins.

/// Errors a plugin (or the registry resolving it) can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin does not support {0}")]
    Unsupported(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Plugin has not been initialized")]
    NotInitialized,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

//! Error types for thinkswitch

use thiserror::Error;

/// Main error type for startup and server lifecycle operations
#[derive(Error, Debug)]
pub enum ThinkswitchError {
    /// Configuration errors (file, flags, validation, registry construction)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Proxy/HTTP server errors
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// Result type alias for thinkswitch operations
pub type Result<T> = std::result::Result<T, ThinkswitchError>;

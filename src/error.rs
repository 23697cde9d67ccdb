//! Error types for teragrab

use thiserror::Error;

/// Result type for teragrab operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for teragrab
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to launch Chrome
    #[error("Failed to launch Chrome: {0}")]
    Launch(String),

    /// Chrome not found on this system
    #[error("Chrome not found")]
    ChromeNotFound,

    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// Navigation error
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// In-page script evaluation raised an exception
    #[error("Script evaluation failed: {0}")]
    Script(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// URL is not a supported share link (rejected before any attempt)
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    /// Binary patching error
    #[error("Patching error in {operation}: {message}")]
    Patching { operation: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Retry budget exhausted
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a patching error
    pub fn patching(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Patching {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Errors that no retry or identity rotation can fix.
    ///
    /// Everything else - navigation timeouts, DNS hiccups, transport drops,
    /// CDP failures - is retryable with a fresh identity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedUrl(_)
                | Error::ChromeNotFound
                | Error::Launch(_)
                | Error::Patching { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::UnsupportedUrl("ftp://x".into()).is_fatal());
        assert!(Error::ChromeNotFound.is_fatal());
        assert!(Error::Launch("no binary".into()).is_fatal());
        assert!(!Error::Navigation("net::ERR_TIMED_OUT".into()).is_fatal());
        assert!(!Error::Timeout("navigation".into()).is_fatal());
        assert!(!Error::cdp("Page.navigate", -32000, "target crashed").is_fatal());
        assert!(!Error::transport("socket closed").is_fatal());
    }
}

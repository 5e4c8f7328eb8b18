//! Error types and exit codes for biblio-notify

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for notification delivery operations
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Channel transport error: {message}")]
    Transport { message: String },

    #[error("Channel could not be established after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Connection attempt cancelled by disconnect")]
    ConnectCancelled,

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Notification API returned {status} for {url}")]
    ApiStatus { status: u16, url: String },

    #[error("Notification API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed payload for '{event}': {message}")]
    MalformedPayload { event: String, message: String },

    #[error("Config error: {message}")]
    ConfigError { message: String },

    #[error("No active session")]
    NoSession,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NotifyError {
    /// Convert error to the CLI exit code:
    /// - 1: IO / config error
    /// - 2: REST collaborator failure
    /// - 3: channel failure
    /// - 4: protocol / payload error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    /// Numeric form of [`exit_code`](Self::exit_code)
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Io(_) | Self::ConfigError { .. } | Self::NoSession => 1,
            Self::ApiStatus { .. } | Self::Http(_) => 2,
            Self::Transport { .. } | Self::ReconnectExhausted { .. } | Self::ConnectCancelled | Self::NotConnected => 3,
            Self::MalformedPayload { .. } | Self::Json(_) => 4,
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

/// Result type alias for biblio-notify operations
pub type Result<T> = std::result::Result<T, NotifyError>;

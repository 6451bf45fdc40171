//! Error types for the Graph connect pipeline

use std::path::PathBuf;

use crate::auth::{AuthenticationFlow, ValidationReport};

/// Result type alias for the connect pipeline.
pub type Result<T> = std::result::Result<T, ConnectError>;

/// Every way a `#!microsoftgraph` invocation can fail.
///
/// All variants are terminal for the invocation that produced them. None of
/// them leave a binding behind in the session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The config file was requested explicitly but could not be read or parsed.
    #[error("Failed to load config file {}: {reason}", .path.display())]
    ConfigLoad { path: PathBuf, reason: String },

    /// One or more values required by the chosen flow are missing.
    #[error("{0}")]
    Validation(ValidationReport),

    /// The named authentication flow is not one this extension handles.
    #[error("Unsupported authentication flow '{0}' (expected one of: InteractiveBrowser, DeviceCode, ClientSecret)")]
    UnsupportedFlow(String),

    /// The sign-in itself failed, timed out or was cancelled.
    #[error("{flow} sign-in failed: {reason}")]
    CredentialConstruction {
        flow: AuthenticationFlow,
        reason: String,
    },

    /// A token could not be obtained from an already-built credential.
    #[error("Token request failed: {0}")]
    TokenRequest(String),

    /// Directive arguments could not be parsed.
    #[error("{0}")]
    Usage(String),
}

impl ConnectError {
    pub(crate) fn credential(flow: AuthenticationFlow, reason: impl Into<String>) -> Self {
        ConnectError::CredentialConstruction {
            flow,
            reason: reason.into(),
        }
    }

    /// Short category label used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectError::ConfigLoad { .. } => "ConfigLoadError",
            ConnectError::Validation(_) => "ValidationError",
            ConnectError::UnsupportedFlow(_) => "UnsupportedFlowError",
            ConnectError::CredentialConstruction { .. } => "CredentialConstructionError",
            ConnectError::TokenRequest(_) => "TokenRequestError",
            ConnectError::Usage(_) => "UsageError",
        }
    }
}

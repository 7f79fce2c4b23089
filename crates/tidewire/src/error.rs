//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use tidewire_config::ConfigError;
use tidewire_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(tidewire::connection_failed),
        help(
            "Check that the realtime backend is running and reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Not connected ({state})")]
    #[diagnostic(
        code(tidewire::not_connected),
        help("The session dropped before the request completed. Try again.")
    )]
    NotConnected { state: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(tidewire::auth_failed),
        help(
            "Verify the identity and token for this profile.\n\
             Run: tidewire config set-token --profile <name>"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(tidewire::no_credentials),
        help(
            "Store a token with: tidewire config set-token\n\
             Or set the TIDEWIRE_TOKEN environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(tidewire::api_error))]
    ApiError { status: Option<u16>, message: String },

    #[error("Send failed: {message}")]
    #[diagnostic(code(tidewire::send_failed))]
    SendFailed { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tidewire::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(tidewire::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: tidewire config set server <url> --profile {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No REST API URL configured")]
    #[diagnostic(
        code(tidewire::no_api_url),
        help("Set one with: tidewire config set api_url <url>, or pass --api-url.")
    )]
    NoApiUrl,

    #[error("Configuration error: {message}")]
    #[diagnostic(code(tidewire::config))]
    Config { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(tidewire::timeout),
        help("Increase the timeout in your profile or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Internal ────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(tidewire::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. }
            | Self::NoCredentials { .. }
            | Self::ApiError {
                status: Some(401 | 403),
                ..
            } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoApiUrl
            | Self::Config { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::ConnectTimeout { timeout_secs } | CoreError::SendTimeout { timeout_secs } => {
                CliError::Timeout {
                    seconds: timeout_secs,
                }
            }
            CoreError::NotConnected { state } => CliError::NotConnected {
                state: state.to_string(),
            },
            CoreError::StateDivergence => CliError::NotConnected {
                state: "link lost".into(),
            },
            CoreError::NotConfigured => CliError::Config {
                message: "client was never initialised with a connection config".into(),
            },
            CoreError::SendFailed { message } => CliError::SendFailed { message },
            CoreError::Api { message, status } => CliError::ApiError { status, message },
            CoreError::UnexpectedResponse { message } => CliError::ApiError {
                status: None,
                message: format!("unexpected response: {message}"),
            },
            CoreError::Config { message } => CliError::Config { message },
            CoreError::InvalidRecord { message } | CoreError::Internal(message) => {
                CliError::Internal(message)
            }
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::ProfileNotFound { name, available } => CliError::ProfileNotFound {
                name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}

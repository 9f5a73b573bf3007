//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and distinct exit codes.

use miette::Diagnostic;
use thiserror::Error;

use forecourt_config::ConfigError;
use forecourt_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const IDENTITY: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to device at {addr}")]
    #[diagnostic(
        code(forecourt::connection_failed),
        help(
            "Check that the device is running and listening.\n\
             Reason: {reason}\n\
             Try: forecourt probe"
        )
    )]
    ConnectionFailed { addr: String, reason: String },

    #[error("Device identity check failed: {message}")]
    #[diagnostic(
        code(forecourt::identity),
        help(
            "The device answered the handshake with an unexpected id or protocol version.\n\
             Check device_id in the [[devices]] table."
        )
    )]
    Identity { message: String },

    #[error("Device closed the connection")]
    #[diagnostic(
        code(forecourt::disconnected),
        help("Restart the device and run: forecourt probe")
    )]
    Disconnected,

    #[error("Device did not answer within {timeout_ms} ms")]
    #[diagnostic(
        code(forecourt::timeout),
        help("Raise timing.request_timeout_ms or check the device.")
    )]
    Timeout { timeout_ms: u64 },

    #[error("{failed} of {total} devices failed the probe")]
    #[diagnostic(code(forecourt::probe_failed))]
    ProbeFailed { failed: usize, total: usize },

    #[error("Device error: {message}")]
    #[diagnostic(code(forecourt::device))]
    Device { message: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("No device named '{name}' in the configuration")]
    #[diagnostic(
        code(forecourt::unknown_device),
        help("Run: forecourt config show to see the configured devices")
    )]
    UnknownDevice { name: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(forecourt::validation))]
    Validation { field: String, reason: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(forecourt::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(forecourt::config))]
    Config(Box<figment::Error>),

    // ── IO ───────────────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected | Self::ProbeFailed { .. } => {
                exit_code::CONNECTION
            }
            Self::Identity { .. } => exit_code::IDENTITY,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::UnknownDevice { .. } => exit_code::NOT_FOUND,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            Self::Device { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { addr, reason } => Self::ConnectionFailed { addr, reason },
            CoreError::IdentityMismatch { message } => Self::Identity { message },
            CoreError::DeviceDisconnected => Self::Disconnected,
            CoreError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            CoreError::UnknownDevice { name } => Self::UnknownDevice { name },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            other => Self::Device {
                message: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(err) => Self::Config(err),
            ConfigError::Serialization(err) => Self::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {err}"),
            },
            ConfigError::Io(err) => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_keep_their_exit_codes() {
        let timeout: CliError = CoreError::Timeout { timeout_ms: 1000 }.into();
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);

        let refused: CliError = CoreError::ConnectionFailed {
            addr: "127.0.0.1:5001".into(),
            reason: "refused".into(),
        }
        .into();
        assert_eq!(refused.exit_code(), exit_code::CONNECTION);

        let unknown: CliError = CoreError::UnknownDevice { name: "pump".into() }.into();
        assert_eq!(unknown.exit_code(), exit_code::NOT_FOUND);
    }

    #[test]
    fn config_validation_is_a_usage_error() {
        let err: CliError = ConfigError::Validation {
            field: "sim_speed".into(),
            reason: "must be a positive number".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::USAGE);
        assert!(err.to_string().contains("sim_speed"));
    }
}

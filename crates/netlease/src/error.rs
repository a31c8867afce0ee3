//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use netlease_config::ConfigError;
use netlease_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Input ────────────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(netlease::validation))]
    Validation { field: String, reason: String },

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(netlease::not_found), help("{hint}"))]
    NotFound {
        resource_type: String,
        identifier: String,
        hint: String,
    },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid configuration: {field}: {reason}")]
    #[diagnostic(
        code(netlease::invalid_config),
        help(
            "Fix the key in your config file or the matching NETLEASE_* variable.\n\
             Check it with: netlease policy check"
        )
    )]
    InvalidConfig { field: String, reason: String },

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(netlease::config_exists),
        help(
            "Found: {path}\n\
             Use --force to overwrite it."
        )
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(netlease::config))]
    Config(Box<ConfigError>),

    // ── Scenario scripts ─────────────────────────────────────────────

    #[error("Could not parse scenario script {path}")]
    #[diagnostic(
        code(netlease::script),
        help("See `netlease simulate --help` for the script format.")
    )]
    Script {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    // ── Platform ─────────────────────────────────────────────────────

    #[error("Network operation failed: {message}")]
    #[diagnostic(code(netlease::network))]
    Network { message: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(netlease::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(netlease::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(netlease::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::Script { .. } => exit_code::USAGE,
            Self::InvalidConfig { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            _ => exit_code::GENERAL,
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.to_string(),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::InvalidConfig { field, reason },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownRequestType { .. } => Self::validation("request", err),
            CoreError::UnknownNetworkKind { .. } => Self::validation("kind", err),
            CoreError::InvalidModifier { .. } => Self::validation("modifier", err),
            CoreError::ValidationFailed { message } => Self::validation("input", message),

            CoreError::Config { message } => Self::InvalidConfig {
                field: "usage".into(),
                reason: message,
            },

            CoreError::BindUnsupported { .. }
            | CoreError::BindFailed { .. }
            | CoreError::Internal(_) => Self::Network {
                message: err.to_string(),
            },
        }
    }
}

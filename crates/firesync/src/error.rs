//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use firesync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the rules backend: {message}")]
    #[diagnostic(
        code(firesync::unreachable),
        help(
            "Check that the backend is running and accessible.\n\
             Set the URL with --url, FIRESYNC_URL, or [backend] url in the config file."
        )
    )]
    Unreachable { message: String },

    // ── Backend ──────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(firesync::backend_error))]
    Backend {
        message: String,
        status: Option<u16>,
    },

    #[error("Update of rule '{id}' was rejected: {message}")]
    #[diagnostic(
        code(firesync::rejected),
        help("The change was rolled back locally. Run: firesync rules get {id}")
    )]
    Rejected { id: String, message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Firewall rule '{identifier}' not found")]
    #[diagnostic(
        code(firesync::not_found),
        help("Run: firesync rules list to see available rules")
    )]
    NotFound { identifier: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(firesync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(firesync::config),
        help("Inspect the file with: firesync config path")
    )]
    Config(Box<figment::Error>),

    #[error("Internal error: {0}")]
    #[diagnostic(code(firesync::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(firesync::json))]
    Json(#[from] serde_json::Error),

    #[error("Could not render YAML: {0}")]
    #[diagnostic(code(firesync::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Could not render TOML: {0}")]
    #[diagnostic(code(firesync::toml))]
    Toml(#[from] toml::ser::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::NotFound { .. }
            | Self::Backend {
                status: Some(404), ..
            } => exit_code::NOT_FOUND,
            Self::Rejected { .. } => exit_code::CONFLICT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NetworkFailure {
                status: None,
                message,
                ..
            } => CliError::Unreachable { message },
            CoreError::NetworkFailure { status, .. } => CliError::Backend {
                message: err.display_message("Failed to load firewall rules"),
                status,
            },
            CoreError::MutationConflict { ref id, .. } => CliError::Rejected {
                id: id.to_string(),
                message: err.display_message("Failed to update rule"),
            },
            CoreError::NotFound { identifier } => CliError::NotFound { identifier },
            CoreError::Config { message } => CliError::Validation {
                field: "cache".into(),
                reason: message,
            },
        }
    }
}

impl From<firesync_api::Error> for CliError {
    fn from(err: firesync_api::Error) -> Self {
        match err {
            firesync_api::Error::InvalidUrl(e) => CliError::Validation {
                field: "url".into(),
                reason: e.to_string(),
            },
            firesync_api::Error::Transport(e) => CliError::Unreachable {
                message: e.to_string(),
            },
            other => CliError::Backend {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

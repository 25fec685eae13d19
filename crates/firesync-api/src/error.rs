use thiserror::Error;

/// Top-level error type for the `firesync-api` crate.
///
/// Every rejection from the rules endpoints ends up here. `firesync-core`
/// maps these into its own error kinds; consumers of the core never see
/// a raw `reqwest::Error`.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Server ──────────────────────────────────────────────────────
    /// Non-2xx response. `details` holds the decoded body (JSON when the
    /// server sent JSON, a string otherwise).
    #[error("{message}")]
    Http {
        message: String,
        status: u16,
        details: Option<serde_json::Value>,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// HTTP status of the rejection, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::InvalidUrl(_) | Self::Deserialization { .. } => None,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Structured body that accompanied the rejection, if any.
    pub fn details(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Http { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_displays_server_message() {
        let err = Error::Http {
            message: "Simulated internal server error".into(),
            status: 500,
            details: None,
        };
        assert_eq!(err.to_string(), "Simulated internal server error");
        assert_eq!(err.status(), Some(500));
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_detected_from_status() {
        let err = Error::Http {
            message: "Firewall rule not found".into(),
            status: 404,
            details: Some(serde_json::json!({ "message": "Firewall rule not found" })),
        };
        assert!(err.is_not_found());
        assert!(err.details().is_some());
    }
}

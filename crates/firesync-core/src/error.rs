// ── Core error types ──
//
// User-facing errors from firesync-core. Consumers never see reqwest
// errors or raw HTTP bodies; collaborator rejections are translated
// into these variants at the backend seam.

use thiserror::Error;

use crate::backend::BackendError;
use crate::model::RuleId;

/// Unified error type for the core crate.
///
/// `Clone` because fetch failures are stored in cache entries and
/// handed to every subscriber as part of their snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    // ── Read errors ──────────────────────────────────────────────────
    /// Transport failure or non-2xx response from a fetch.
    #[error("{message}")]
    NetworkFailure {
        message: String,
        status: Option<u16>,
        details: Option<serde_json::Value>,
    },

    // ── Write errors ─────────────────────────────────────────────────
    /// The backend rejected a write after the optimistic patch was
    /// applied. The patch has already been rolled back when this is
    /// returned.
    #[error("Update of rule {id} rejected: {message}")]
    MutationConflict {
        id: RuleId,
        message: String,
        status: Option<u16>,
    },

    /// The target no longer exists (or was never loaded).
    #[error("Not found: {identifier}")]
    NotFound { identifier: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Translate a rejected fetch.
    pub(crate) fn from_fetch(err: BackendError) -> Self {
        if err.status == Some(404) {
            return Self::NotFound {
                identifier: "rule list".to_owned(),
            };
        }
        Self::NetworkFailure {
            message: err.message,
            status: err.status,
            details: err.details,
        }
    }

    /// Translate a rejected write of rule `id`.
    pub(crate) fn from_write(id: &RuleId, err: BackendError) -> Self {
        if err.status == Some(404) {
            return Self::NotFound {
                identifier: id.to_string(),
            };
        }
        Self::MutationConflict {
            id: id.clone(),
            message: err.message,
            status: err.status,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NetworkFailure { status, .. } | Self::MutationConflict { status, .. } => *status,
            Self::NotFound { .. } => Some(404),
            Self::Config { .. } => None,
        }
    }

    /// Display-ready text for presentation collaborators.
    ///
    /// Uses the backend's message when it has one, otherwise
    /// `"{fallback} ({status})"`, otherwise just `fallback`.
    pub fn display_message(&self, fallback: &str) -> String {
        let message = match self {
            Self::NetworkFailure { message, .. } | Self::MutationConflict { message, .. } => {
                message.as_str()
            }
            Self::NotFound { .. } | Self::Config { .. } => {
                return self.to_string();
            }
        };

        if !message.trim().is_empty() {
            return message.to_owned();
        }
        match self.status() {
            Some(status) => format!("{fallback} ({status})"),
            None => fallback.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(message: &str, status: Option<u16>) -> BackendError {
        BackendError {
            message: message.into(),
            status,
            details: None,
        }
    }

    #[test]
    fn fetch_404_becomes_not_found() {
        let err = CoreError::from_fetch(backend("gone", Some(404)));
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn fetch_500_becomes_network_failure() {
        let err = CoreError::from_fetch(backend("boom", Some(500)));
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.display_message("Failed to load firewall rules"), "boom");
    }

    #[test]
    fn write_rejection_becomes_conflict() {
        let id = RuleId::new("r1");
        let err = CoreError::from_write(
            &id,
            backend("Simulated firewall rule update error", Some(500)),
        );
        assert!(matches!(err, CoreError::MutationConflict { ref id, .. } if id.as_str() == "r1"));
    }

    #[test]
    fn write_404_names_the_rule() {
        let err = CoreError::from_write(&RuleId::new("r9"), backend("nope", Some(404)));
        assert_eq!(err.to_string(), "Not found: r9");
    }

    #[test]
    fn blank_message_falls_back_to_status() {
        let err = CoreError::from_fetch(backend("  ", Some(502)));
        assert_eq!(
            err.display_message("Failed to load firewall rules"),
            "Failed to load firewall rules (502)"
        );
        let err = CoreError::from_fetch(backend("", None));
        assert_eq!(err.display_message("Request failed"), "Request failed");
    }
}

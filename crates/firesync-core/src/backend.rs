// ── Collaborator seam ──
//
// The core consumes exactly two remote operations. Anything that can
// list and patch rules (the HTTP client, an in-process fake) plugs in
// here; URL construction, headers and transport retries stay on the
// other side of this trait.

use std::future::Future;

use thiserror::Error;

use crate::model::{Rule, RuleId, RulePatch};
use crate::query::CanonicalQuery;

/// Structured rejection from a collaborator: `{message, status, details}`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    /// HTTP status, or `None` for transport failures.
    pub status: Option<u16>,
    pub details: Option<serde_json::Value>,
}

impl BackendError {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
            details: None,
        }
    }
}

/// Remote source of truth for firewall rules.
///
/// Both futures must be `Send`: fetches and writes run as spawned tasks.
pub trait RuleBackend: Send + Sync + 'static {
    /// Fetch the rules matching `query`, in backend order.
    fn fetch_rules(
        &self,
        query: &CanonicalQuery,
    ) -> impl Future<Output = Result<Vec<Rule>, BackendError>> + Send;

    /// Apply `patch` to rule `id`; resolves to the full updated rule.
    fn patch_rule(
        &self,
        id: &RuleId,
        patch: &RulePatch,
    ) -> impl Future<Output = Result<Rule, BackendError>> + Send;
}

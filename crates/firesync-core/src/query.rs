// ── Query key codec ──
//
// Maps a consumer-facing `QueryDescriptor` to its canonical form, the
// cache key derived from it, and the tags the resulting entry carries.
// Pure and total: every descriptor has exactly one canonical form.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Rule, RuleAction, RuleId};

// ── QueryDescriptor ─────────────────────────────────────────────────

/// Parameters of a rule list read, as a consumer sets them.
///
/// Every field is optional; absent, `false` and blank values mean
/// "no filter" and canonicalize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_filter: Option<RuleAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulate_failure: Option<bool>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_filter = Some(text.into());
        self
    }

    pub fn with_enabled_only(mut self, enabled_only: bool) -> Self {
        self.enabled_only = Some(enabled_only);
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.action_filter = Some(action);
        self
    }

    pub fn with_simulated_failure(mut self, simulate: bool) -> Self {
        self.simulate_failure = Some(simulate);
        self
    }

    pub fn canonical(&self) -> CanonicalQuery {
        CanonicalQuery::from(self)
    }
}

// ── CanonicalQuery ──────────────────────────────────────────────────

/// Trimmed, defaulted form of a [`QueryDescriptor`].
///
/// Two descriptors share a cache entry iff their canonical forms are
/// equal. The text filter keeps its case: `"SSH"` and `"ssh"` are
/// different keys even though the backend matches them the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CanonicalQuery {
    pub text_filter: Option<String>,
    pub enabled_only: bool,
    pub action_filter: Option<RuleAction>,
    pub simulate_failure: bool,
}

impl From<&QueryDescriptor> for CanonicalQuery {
    fn from(d: &QueryDescriptor) -> Self {
        Self {
            text_filter: d
                .text_filter
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned),
            enabled_only: d.enabled_only.unwrap_or(false),
            action_filter: d.action_filter,
            simulate_failure: d.simulate_failure.unwrap_or(false),
        }
    }
}

impl CanonicalQuery {
    /// Cache key: `rules({...})` with only the non-default fields, in
    /// alphabetical order.
    pub fn key(&self) -> QueryKey {
        let mut fields = Vec::with_capacity(4);
        if let Some(action) = self.action_filter {
            fields.push(format!("\"actionFilter\":\"{action}\""));
        }
        if self.enabled_only {
            fields.push("\"enabledOnly\":true".to_owned());
        }
        if self.simulate_failure {
            fields.push("\"simulateFailure\":true".to_owned());
        }
        if let Some(text) = &self.text_filter {
            // Value's Display does the JSON string escaping.
            fields.push(format!(
                "\"textFilter\":{}",
                serde_json::Value::from(text.as_str())
            ));
        }
        QueryKey(format!("rules({{{}}})", fields.join(",")))
    }

    /// Backend filter semantics: case-insensitive substring match on the
    /// name, enabled-only, exact action. Backing order is not changed by
    /// filtering.
    pub fn matches(&self, rule: &Rule) -> bool {
        let text_ok = self
            .text_filter
            .as_deref()
            .is_none_or(|q| rule.name.to_lowercase().contains(&q.to_lowercase()));
        let enabled_ok = !self.enabled_only || rule.enabled;
        let action_ok = self.action_filter.is_none_or(|a| rule.action == a);
        text_ok && enabled_ok && action_ok
    }

    /// Descriptor that round-trips to this canonical form.
    pub fn to_descriptor(&self) -> QueryDescriptor {
        QueryDescriptor {
            text_filter: self.text_filter.clone(),
            enabled_only: self.enabled_only.then_some(true),
            action_filter: self.action_filter,
            simulate_failure: self.simulate_failure.then_some(true),
        }
    }
}

// ── QueryKey ────────────────────────────────────────────────────────

/// Canonical cache key of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Tags ────────────────────────────────────────────────────────────

/// Invalidation label attached to cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// Carried by every rule list entry.
    List,
    /// Carried by entries whose last successful fetch returned this rule.
    Rule(RuleId),
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Rule(id) => write!(f, "{id}"),
        }
    }
}

/// Tags a freshly created entry carries before any fetch has succeeded.
pub fn base_tags() -> BTreeSet<Tag> {
    BTreeSet::from([Tag::List])
}

/// Tags an entry carries after a successful fetch returned `ids`.
pub fn result_tags<'a>(ids: impl IntoIterator<Item = &'a RuleId>) -> BTreeSet<Tag> {
    let mut tags = base_tags();
    tags.extend(ids.into_iter().cloned().map(Tag::Rule));
    tags
}

/// Canonicalize a descriptor into its cache key and initial tag set.
pub fn canonicalize(descriptor: &QueryDescriptor) -> (QueryKey, BTreeSet<Tag>) {
    (descriptor.canonical().key(), base_tags())
}

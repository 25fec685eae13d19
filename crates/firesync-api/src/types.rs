// Wire types for the firewall rules endpoints.
//
// Enum-valued fields stay as strings here; firesync-core owns the
// domain enums and validates them during conversion.

use serde::{Deserialize, Serialize};

/// A firewall rule exactly as the backend serializes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleDto {
    pub id: String,
    pub name: String,
    pub source: String,
    pub destination: String,
    /// `"TCP"`, `"UDP"` or `"ICMP"`.
    pub protocol: String,
    pub port: String,
    /// `"allow"` or `"deny"`.
    pub action: String,
    pub enabled: bool,
}

/// Partial update body for `PATCH /api/firewall-rules/{id}`.
///
/// Only the fields that are `Some` are sent. There is deliberately no
/// `id` field: identifiers are immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePatchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Query parameters for `GET /api/firewall-rules`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleQueryParams {
    pub q: Option<String>,
    pub enabled_only: bool,
    pub action: Option<String>,
    pub simulate_error: bool,
}

impl RuleQueryParams {
    /// Render as `(name, value)` pairs. Absent, empty and `false` values
    /// are omitted rather than sent as empty strings.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();

        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            pairs.push(("q", q.to_owned()));
        }
        if self.enabled_only {
            pairs.push(("enabled", "true".to_owned()));
        }
        if let Some(action) = &self.action {
            pairs.push(("action", action.clone()));
        }
        if self.simulate_error {
            pairs.push(("error", "1".to_owned()));
        }

        pairs
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_params_render_no_pairs() {
        assert!(RuleQueryParams::default().to_pairs().is_empty());
    }

    #[test]
    fn params_are_trimmed_and_ordered() {
        let params = RuleQueryParams {
            q: Some("  ssh ".into()),
            enabled_only: true,
            action: Some("deny".into()),
            simulate_error: true,
        };
        assert_eq!(
            params.to_pairs(),
            vec![
                ("q", "ssh".to_owned()),
                ("enabled", "true".to_owned()),
                ("action", "deny".to_owned()),
                ("error", "1".to_owned()),
            ]
        );
    }

    #[test]
    fn blank_text_filter_is_omitted() {
        let params = RuleQueryParams {
            q: Some("   ".into()),
            ..RuleQueryParams::default()
        };
        assert!(params.to_pairs().is_empty());
    }

    #[test]
    fn patch_body_serializes_only_present_fields() {
        let body = RulePatchBody {
            enabled: Some(false),
            ..RulePatchBody::default()
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "enabled": false })
        );
    }
}

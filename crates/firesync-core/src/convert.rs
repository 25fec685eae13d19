// ── API-to-domain type conversions ──
//
// Bridges raw `firesync_api` wire types into canonical domain types and
// plugs `RulesClient` into the `RuleBackend` seam.

use firesync_api::{FirewallRuleDto, RulePatchBody, RuleQueryParams, RulesClient};

use crate::backend::{BackendError, RuleBackend};
use crate::model::{Rule, RuleId, RulePatch};
use crate::query::CanonicalQuery;

// ── Errors ───────────────────────────────────────────────────────────

impl From<firesync_api::Error> for BackendError {
    fn from(err: firesync_api::Error) -> Self {
        let status = err.status();
        match err {
            firesync_api::Error::Http {
                message, details, ..
            } => Self {
                message,
                status,
                details,
            },
            other => Self {
                message: other.to_string(),
                status,
                details: None,
            },
        }
    }
}

// ── Rules ────────────────────────────────────────────────────────────

impl TryFrom<FirewallRuleDto> for Rule {
    type Error = BackendError;

    fn try_from(dto: FirewallRuleDto) -> Result<Self, Self::Error> {
        let protocol = dto.protocol.parse().map_err(|_| {
            BackendError::new(
                format!("rule {}: unknown protocol {:?}", dto.id, dto.protocol),
                None,
            )
        })?;
        let action = dto.action.parse().map_err(|_| {
            BackendError::new(
                format!("rule {}: unknown action {:?}", dto.id, dto.action),
                None,
            )
        })?;

        Ok(Self {
            id: RuleId::from(dto.id),
            name: dto.name,
            source: dto.source,
            destination: dto.destination,
            protocol,
            port: dto.port,
            action,
            enabled: dto.enabled,
        })
    }
}

impl From<&RulePatch> for RulePatchBody {
    fn from(p: &RulePatch) -> Self {
        Self {
            name: p.name.clone(),
            source: p.source.clone(),
            destination: p.destination.clone(),
            protocol: p.protocol.map(|v| v.to_string()),
            port: p.port.clone(),
            action: p.action.map(|v| v.to_string()),
            enabled: p.enabled,
        }
    }
}

impl From<&CanonicalQuery> for RuleQueryParams {
    fn from(q: &CanonicalQuery) -> Self {
        Self {
            q: q.text_filter.clone(),
            enabled_only: q.enabled_only,
            action: q.action_filter.map(|a| a.to_string()),
            simulate_error: q.simulate_failure,
        }
    }
}

// ── Backend impl ─────────────────────────────────────────────────────

impl RuleBackend for RulesClient {
    async fn fetch_rules(&self, query: &CanonicalQuery) -> Result<Vec<Rule>, BackendError> {
        let params = RuleQueryParams::from(query);
        let rules = self.list_rules(&params).await?;
        rules.into_iter().map(Rule::try_from).collect()
    }

    async fn patch_rule(&self, id: &RuleId, patch: &RulePatch) -> Result<Rule, BackendError> {
        let body = RulePatchBody::from(patch);
        let updated = RulesClient::patch_rule(self, id.as_str(), &body).await?;
        Rule::try_from(updated)
    }
}

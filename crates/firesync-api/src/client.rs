// Async HTTP client for the firewall rules REST endpoints.
//
// Base path: {base}/api/firewall-rules
// Reads: GET with filter query params; writes: PATCH /{id} with a partial body.

use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::transport::TransportConfig;
use crate::types::{FirewallRuleDto, RulePatchBody, RuleQueryParams};

const RULES_PATH: &str = "api/firewall-rules";

/// Async client for the firewall rules API.
///
/// Cheap to clone: `reqwest::Client` is reference counted internally.
#[derive(Debug, Clone)]
pub struct RulesClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RulesClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build a client for `base_url` using the given transport settings.
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::with_client(http, base_url)
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Ensure the base URL ends with `/` so relative joins append
    /// instead of replacing the last path segment.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn rules_url(&self) -> Result<Url, Error> {
        Ok(self.base_url.join(RULES_PATH)?)
    }

    fn rule_url(&self, id: &str) -> Result<Url, Error> {
        let mut url = self.rules_url()?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .push(id);
        Ok(url)
    }

    /// The endpoint a list request would hit, query string included.
    pub fn list_endpoint(&self, params: &RuleQueryParams) -> Result<Url, Error> {
        let mut url = self.rules_url()?;
        let pairs = params.to_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `GET /api/firewall-rules` with filters applied server-side.
    pub async fn list_rules(&self, params: &RuleQueryParams) -> Result<Vec<FirewallRuleDto>, Error> {
        let url = self.list_endpoint(params)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        handle_response(resp).await
    }

    /// `PATCH /api/firewall-rules/{id}`; returns the full updated rule.
    pub async fn patch_rule(&self, id: &str, body: &RulePatchBody) -> Result<FirewallRuleDto, Error> {
        let url = self.rule_url(id)?;
        debug!("PATCH {url}");

        let resp = self.http.patch(url).json(body).send().await?;
        handle_response(resp).await
    }
}

// ── Response handling ────────────────────────────────────────────────

async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    } else {
        Err(parse_error(status, resp).await)
    }
}

/// Decode a non-2xx response into `Error::Http`.
///
/// JSON bodies are kept as structured `details`; the message comes from a
/// string `message` field, then from a non-empty text body, then from
/// the status code.
async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let is_json = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    let raw = resp.text().await.unwrap_or_default();

    let details = if is_json {
        serde_json::from_str::<serde_json::Value>(&raw).ok()
    } else if raw.trim().is_empty() {
        None
    } else {
        Some(serde_json::Value::String(raw))
    };

    let message = details
        .as_ref()
        .and_then(message_from_details)
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));

    Error::Http {
        message,
        status: status.as_u16(),
        details,
    }
}

fn message_from_details(details: &serde_json::Value) -> Option<String> {
    let text = match details {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => map.get("message")?.as_str()?,
        _ => return None,
    };
    (!text.trim().is_empty()).then(|| text.to_owned())
}

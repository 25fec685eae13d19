// firesync-api: async client for the `/api/firewall-rules` REST endpoints

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::RulesClient;
pub use error::Error;
pub use transport::TransportConfig;
pub use types::{FirewallRuleDto, RulePatchBody, RuleQueryParams};

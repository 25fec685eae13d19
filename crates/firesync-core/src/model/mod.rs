// ── Domain model ──

pub mod rule;

pub use rule::{Protocol, Rule, RuleAction, RuleId, RulePatch};

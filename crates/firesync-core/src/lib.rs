//! Client-side synchronization core for firewall rules.
//!
//! Sits between a rule backend (`firesync-api`, or any [`RuleBackend`])
//! and presentation code (the `firesync` CLI):
//!
//! - **[`QueryClient`]**: central facade. [`query()`](QueryClient::query)
//!   vends a [`QuerySubscription`], serving fresh entries from cache and
//!   joining requests already in flight;
//!   [`mutate()`](QueryClient::mutate) applies a patch optimistically and
//!   confirms or rolls it back when the backend answers.
//!
//! - **[`DataStore`]**: cache entries keyed by canonical query, each
//!   owned by at most one in-flight request. A response whose request no
//!   longer owns its key is discarded, so only the last-issued fetch for a
//!   key is ever observed. Entries resolve their rows through a shared,
//!   normalized entity table and are published over `tokio::sync::watch`.
//!
//! - **Query codec** ([`query`]): [`QueryDescriptor`] canonicalizes to a
//!   [`QueryKey`] and carries [`Tag`]s used for invalidation.
//!
//! - **Domain model** ([`model`]): [`Rule`], [`RulePatch`], [`RuleId`].

pub mod backend;
pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
mod mutation;
pub mod query;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{BackendError, RuleBackend};
pub use client::{LifecycleEvent, QueryClient};
pub use config::CacheConfig;
pub use error::CoreError;
pub use model::{Protocol, Rule, RuleAction, RuleId, RulePatch};
pub use query::{CanonicalQuery, QueryDescriptor, QueryKey, Tag, canonicalize};
pub use store::{CommitOutcome, DataStore, QuerySnapshot, QueryStatus, Rollback};
pub use stream::{ParamDebouncer, QuerySubscription, SnapshotStream};

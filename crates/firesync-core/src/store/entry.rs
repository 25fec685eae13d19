// ── Cache entries ──
//
// Per-key bookkeeping: which ids the last good fetch returned, which
// request currently owns the key, and the watch channel subscribers
// read their snapshots from.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::CoreError;
use crate::model::{Rule, RuleId};
use crate::query::{CanonicalQuery, QueryKey, Tag, base_tags};

/// Lifecycle state of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Idle,
    Loading,
    Succeeded,
    Failed,
}

/// Unique id of one fetch attempt. Later requests compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Proof of ownership handed out by
/// [`DataStore::begin_request`](super::DataStore::begin_request).
///
/// Only the ticket that currently owns its key may commit a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub key: QueryKey,
    pub id: RequestId,
    /// Logical clock at issue time; orders this response against
    /// confirmed writes in the entity table.
    pub(crate) issued_at: u64,
}

/// Result of trying to commit a fetch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// A newer request owns the key (or the entry is gone); the response
    /// was dropped without touching the cache.
    StaleDiscard,
}

/// What a subscriber sees for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    pub status: QueryStatus,
    /// Rules in backend order, resolved through the entity table.
    pub data: Arc<Vec<Arc<Rule>>>,
    pub error: Option<CoreError>,
    /// A fetch is in flight while earlier data is still shown.
    pub is_refetching: bool,
    /// Wall-clock time of the last applied success.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl QuerySnapshot {
    pub(crate) fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: Arc::new(Vec::new()),
            error: None,
            is_refetching: false,
            fetched_at: None,
        }
    }

    /// First load in flight with nothing to show yet.
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading && !self.is_refetching
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Succeeded
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Failed
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.data
    }
}

pub(crate) struct CacheEntry {
    pub query: CanonicalQuery,
    /// Ids of the last applied success, in backend order.
    pub ids: Vec<RuleId>,
    pub has_data: bool,
    pub status: QueryStatus,
    pub error: Option<CoreError>,
    pub owner: Option<RequestId>,
    pub tags: BTreeSet<Tag>,
    pub dirty: bool,
    pub subscribers: usize,
    /// Set when the subscriber count drops to zero.
    pub idle_since: Option<Instant>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub tx: watch::Sender<QuerySnapshot>,
}

impl CacheEntry {
    pub(crate) fn new(query: CanonicalQuery, now: Instant) -> Self {
        let (tx, _) = watch::channel(QuerySnapshot::idle());
        Self {
            query,
            ids: Vec::new(),
            has_data: false,
            status: QueryStatus::Idle,
            error: None,
            owner: None,
            tags: base_tags(),
            dirty: false,
            subscribers: 0,
            idle_since: Some(now),
            fetched_at: None,
            tx,
        }
    }

    pub(crate) fn owns(&self, ticket: &RequestTicket) -> bool {
        self.owner == Some(ticket.id)
    }

    /// Build the snapshot subscribers should see, resolving ids through
    /// `resolve`. Ids the table no longer knows are skipped.
    pub(crate) fn snapshot<F>(&self, resolve: F) -> QuerySnapshot
    where
        F: Fn(&RuleId) -> Option<Arc<Rule>>,
    {
        let data: Vec<Arc<Rule>> = self.ids.iter().filter_map(resolve).collect();
        QuerySnapshot {
            status: self.status,
            data: Arc::new(data),
            error: self.error.clone(),
            is_refetching: self.status == QueryStatus::Loading && self.has_data,
            fetched_at: self.fetched_at,
        }
    }

    pub(crate) fn is_evictable(&self, now: Instant, keep_for: std::time::Duration) -> bool {
        self.subscribers == 0
            && self
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) >= keep_for)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("query", &self.query)
            .field("ids", &self.ids)
            .field("status", &self.status)
            .field("owner", &self.owner)
            .field("dirty", &self.dirty)
            .field("subscribers", &self.subscribers)
            .finish_non_exhaustive()
    }
}

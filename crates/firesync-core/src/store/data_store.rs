// ── Central reactive data store ──
//
// Cache entries keyed by canonical query plus the normalized entity
// table they resolve through. Every operation is one short critical
// section; the lock is never held across an await, so each step runs
// to completion without interleaving with another.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::entity_table::{Baseline, EntityTable, MutationId, Rollback};
use super::entry::{
    CacheEntry, CommitOutcome, QuerySnapshot, QueryStatus, RequestId, RequestTicket,
};
use crate::error::CoreError;
use crate::model::{Rule, RuleId, RulePatch};
use crate::query::{CanonicalQuery, QueryKey, Tag, base_tags, result_tags};

/// A subscribed entry that needs a background refetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefetchTarget {
    pub key: QueryKey,
    pub query: CanonicalQuery,
}

/// How a new subscriber should treat an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    /// Succeeded and not dirty: serve from cache.
    Fresh,
    /// A request is already in flight for the current params.
    InFlight,
    /// Idle, failed, or dirty: issue a request.
    Stale,
}

/// An optimistic patch waiting for the backend.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub id: RuleId,
    pub mutation: MutationId,
    baseline: Baseline,
}

#[derive(Default)]
struct StoreState {
    entries: IndexMap<QueryKey, CacheEntry>,
    entities: EntityTable,
    /// Logical clock, advanced on every request issue and write commit.
    clock: u64,
    next_request: u64,
    next_mutation: u64,
}

impl StoreState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn publish(&self, key: &QueryKey) {
        if let Some(entry) = self.entries.get(key) {
            let snapshot = entry.snapshot(|id| self.entities.get(id));
            entry.tx.send_replace(snapshot);
        }
    }

    /// Re-publish every entry currently showing rule `id`.
    fn publish_containing(&self, id: &RuleId) {
        for (key, entry) in &self.entries {
            if entry.has_data && entry.ids.contains(id) {
                self.publish(key);
            }
        }
    }

    fn get_or_create(&mut self, query: &CanonicalQuery) -> QueryKey {
        let key = query.key();
        self.entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(query.clone(), Instant::now()));
        key
    }
}

/// Owner of all cached query state for one [`QueryClient`](crate::QueryClient).
///
/// Consumers read snapshots through watch channels; writes go through
/// the operations below only.
pub struct DataStore {
    state: Mutex<StoreState>,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Entries ──────────────────────────────────────────────────────

    /// Return the key for `query`, inserting an `idle` entry if absent.
    pub fn get_or_create(&self, query: &CanonicalQuery) -> QueryKey {
        self.lock().get_or_create(query)
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot> {
        self.lock()
            .entries
            .get(key)
            .map(|entry| entry.tx.borrow().clone())
    }

    pub fn tags(&self, key: &QueryKey) -> Option<BTreeSet<Tag>> {
        self.lock().entries.get(key).map(|entry| entry.tags.clone())
    }

    pub fn is_dirty(&self, key: &QueryKey) -> bool {
        self.lock().entries.get(key).is_some_and(|entry| entry.dirty)
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.lock()
            .entries
            .get(key)
            .map_or(0, |entry| entry.subscribers)
    }

    pub(crate) fn freshness(&self, key: &QueryKey) -> Freshness {
        let state = self.lock();
        match state.entries.get(key) {
            Some(entry) if !entry.dirty && entry.status == QueryStatus::Succeeded => {
                Freshness::Fresh
            }
            Some(entry) if !entry.dirty && entry.status == QueryStatus::Loading => {
                Freshness::InFlight
            }
            _ => Freshness::Stale,
        }
    }

    // ── Staleness guard ──────────────────────────────────────────────

    /// Issue a fresh request id for `key` and make it the sole owner.
    ///
    /// Any earlier in-flight request for the key loses the right to
    /// commit. Returns `None` if the entry does not exist.
    pub fn begin_request(&self, key: &QueryKey) -> Option<RequestTicket> {
        let mut state = self.lock();
        if !state.entries.contains_key(key) {
            return None;
        }
        state.next_request += 1;
        let id = RequestId(state.next_request);
        let issued_at = state.tick();

        let entry = state.entries.get_mut(key)?;
        entry.owner = Some(id);
        entry.status = QueryStatus::Loading;
        entry.dirty = false;
        entry.error = None;
        trace!(key = %key, request = %id, "request issued");

        state.publish(key);
        Some(RequestTicket {
            key: key.clone(),
            id,
            issued_at,
        })
    }

    /// Commit a successful response, unless a newer request owns the key.
    pub fn commit_success(&self, ticket: &RequestTicket, rules: Vec<Rule>) -> CommitOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(entry) = state.entries.get(&ticket.key) else {
            debug!(key = %ticket.key, request = %ticket.id, "entry evicted, response dropped");
            return CommitOutcome::StaleDiscard;
        };
        if !entry.owns(ticket) {
            debug!(
                key = %ticket.key,
                request = %ticket.id,
                owner = ?entry.owner,
                "stale response discarded"
            );
            return CommitOutcome::StaleDiscard;
        }

        let ids: Vec<RuleId> = rules.iter().map(|r| r.id.clone()).collect();
        let mut changed = Vec::new();
        for rule in rules {
            let id = rule.id.clone();
            if state.entities.upsert_server(rule, ticket.issued_at) {
                changed.push(id);
            }
        }

        if let Some(entry) = state.entries.get_mut(&ticket.key) {
            entry.tags = result_tags(&ids);
            entry.ids = ids;
            entry.has_data = true;
            entry.status = QueryStatus::Succeeded;
            entry.error = None;
            entry.owner = None;
            entry.fetched_at = Some(Utc::now());
            debug!(key = %ticket.key, request = %ticket.id, rows = entry.ids.len(), "fetch committed");
        }

        state.publish(&ticket.key);
        // Other lists showing a rule whose value moved.
        for (key, entry) in &state.entries {
            let shows_changed = entry.ids.iter().any(|id| changed.contains(id));
            if *key != ticket.key && entry.has_data && shows_changed {
                state.publish(key);
            }
        }
        CommitOutcome::Applied
    }

    /// Commit a failed response under the same guard. Last-known data is
    /// cleared so the error never sits next to rows from other params.
    pub fn commit_failure(&self, ticket: &RequestTicket, error: CoreError) -> CommitOutcome {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&ticket.key) else {
            debug!(key = %ticket.key, request = %ticket.id, "entry evicted, failure dropped");
            return CommitOutcome::StaleDiscard;
        };
        if !entry.owns(ticket) {
            debug!(
                key = %ticket.key,
                request = %ticket.id,
                owner = ?entry.owner,
                "stale failure discarded"
            );
            return CommitOutcome::StaleDiscard;
        }

        debug!(key = %ticket.key, request = %ticket.id, error = %error, "fetch failed");
        entry.ids.clear();
        entry.has_data = false;
        entry.tags = base_tags();
        entry.status = QueryStatus::Failed;
        entry.error = Some(error);
        entry.owner = None;

        state.publish(&ticket.key);
        CommitOutcome::Applied
    }

    // ── Invalidation ─────────────────────────────────────────────────

    /// Mark every entry tagged `tag` dirty. Current data stays visible.
    ///
    /// Returns the entries with at least one subscriber; the caller
    /// schedules their refetch. The rest refetch on next subscription.
    pub fn invalidate(&self, tag: &Tag) -> Vec<RefetchTarget> {
        let mut state = self.lock();
        let mut targets = Vec::new();
        for (key, entry) in &mut state.entries {
            if !entry.tags.contains(tag) {
                continue;
            }
            entry.dirty = true;
            if entry.subscribers > 0 {
                targets.push(RefetchTarget {
                    key: key.clone(),
                    query: entry.query.clone(),
                });
            }
        }
        debug!(tag = %tag, refetch = targets.len(), "tag invalidated");
        targets
    }

    /// Mark a single entry dirty; returns a target if it is subscribed.
    pub fn invalidate_key(&self, key: &QueryKey) -> Option<RefetchTarget> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(key)?;
        entry.dirty = true;
        (entry.subscribers > 0).then(|| RefetchTarget {
            key: key.clone(),
            query: entry.query.clone(),
        })
    }

    // ── Entities ─────────────────────────────────────────────────────

    /// Current visible value of a rule, including pending optimistic
    /// patches.
    pub fn read_entity(&self, id: &RuleId) -> Option<Arc<Rule>> {
        self.lock().entities.get(id)
    }

    pub fn entity_count(&self) -> usize {
        self.lock().entities.len()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Register a subscriber on `query`'s entry, creating it if needed.
    pub fn subscribe(&self, query: &CanonicalQuery) -> (QueryKey, watch::Receiver<QuerySnapshot>) {
        let mut state = self.lock();
        let key = state.get_or_create(query);
        let rx = match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.subscribers += 1;
                entry.idle_since = None;
                entry.tx.subscribe()
            }
            // get_or_create just inserted it under the same lock.
            None => watch::channel(QuerySnapshot::idle()).1,
        };
        (key, rx)
    }

    /// Drop one subscriber; the entry starts aging toward eviction at zero.
    pub fn unsubscribe(&self, key: &QueryKey) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.idle_since = Some(Instant::now());
                trace!(key = %key, "last subscriber left");
            }
        }
    }

    /// Every entry with at least one subscriber.
    pub fn subscribed_queries(&self) -> Vec<RefetchTarget> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.subscribers > 0)
            .map(|(key, entry)| RefetchTarget {
                key: key.clone(),
                query: entry.query.clone(),
            })
            .collect()
    }

    /// Remove entries unsubscribed for at least `keep_for`.
    /// Returns the number evicted.
    pub fn evict_idle(&self, keep_for: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, entry| {
            let evict = entry.is_evictable(now, keep_for);
            if evict {
                debug!(key = %key, "evicting idle entry");
            }
            !evict
        });
        before - state.entries.len()
    }

    // ── Optimistic writes ────────────────────────────────────────────

    /// Layer `patch` over rule `id` and notify every list showing it.
    pub(crate) fn apply_optimistic(
        &self,
        id: &RuleId,
        patch: RulePatch,
    ) -> Result<PendingWrite, CoreError> {
        let mut state = self.lock();
        state.next_mutation += 1;
        let mutation = MutationId(state.next_mutation);
        let baseline = state
            .entities
            .apply_optimistic(id, mutation, patch)
            .ok_or_else(|| CoreError::NotFound {
                identifier: id.to_string(),
            })?;
        state.publish_containing(id);
        Ok(PendingWrite {
            id: id.clone(),
            mutation,
            baseline,
        })
    }

    /// The backend accepted the write; adopt its returned rule.
    pub(crate) fn confirm_write(&self, write: PendingWrite, rule: Rule) {
        let mut state = self.lock();
        let now = state.tick();
        state.entities.confirm(&write.id, write.mutation, rule, now);
        state.publish_containing(&write.id);
    }

    /// The backend rejected the write; undo the patch.
    pub(crate) fn rollback_write(&self, write: PendingWrite) -> Rollback {
        let mut state = self.lock();
        let outcome = state
            .entities
            .rollback(&write.id, write.mutation, write.baseline);
        state.publish_containing(&write.id);
        outcome
    }
}

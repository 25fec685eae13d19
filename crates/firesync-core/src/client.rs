// ── Query client ──
//
// Fetch coordination on top of the DataStore: cache hits, request
// dedup, background refetches after invalidation or lifecycle events,
// and the idle-eviction sweeper.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backend::RuleBackend;
use crate::config::CacheConfig;
use crate::error::CoreError;
use crate::model::{Rule, RuleId};
use crate::query::{CanonicalQuery, QueryDescriptor, QueryKey, Tag};
use crate::store::{CommitOutcome, DataStore, Freshness, RefetchTarget, RequestTicket};
use crate::stream::QuerySubscription;

/// External triggers that re-synchronize every subscribed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    /// The consumer regained focus.
    Focus,
    /// Connectivity came back.
    Reconnect,
}

// ── QueryClient ──────────────────────────────────────────────────────

/// Main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ClientInner>`. Fetches and refetches run
/// as spawned tokio tasks, so every method that may start one must be
/// called from within a runtime.
pub struct QueryClient<B: RuleBackend> {
    inner: Arc<ClientInner<B>>,
}

impl<B: RuleBackend> Clone for QueryClient<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<B> {
    config: CacheConfig,
    store: Arc<DataStore>,
    backend: B,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: RuleBackend> QueryClient<B> {
    /// Create a client with an empty cache. Background tasks are not
    /// running until [`start()`](Self::start).
    pub fn new(backend: B, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                store: Arc::new(DataStore::new()),
                backend,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Access the underlying DataStore.
    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the idle-eviction sweeper. Calling it twice is a no-op, and
    /// so is calling it with an invalid [`CacheConfig`].
    pub fn start(&self) {
        let mut handles = self
            .inner
            .task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !handles.is_empty() || self.inner.cancel.is_cancelled() {
            return;
        }
        if let Err(err) = self.inner.config.validate() {
            warn!(error = %err, "idle sweeper not started");
            return;
        }

        let config = &self.inner.config;
        handles.push(tokio::spawn(sweep_task(
            Arc::clone(&self.inner.store),
            config.keep_unused_for,
            config.sweep_interval,
            self.inner.cancel.clone(),
        )));
        debug!(
            keep_unused_for = ?config.keep_unused_for,
            sweep_interval = ?config.sweep_interval,
            "query client started"
        );
    }

    /// Stop background tasks and wait for them to exit.
    ///
    /// In-flight fetches are left to finish; their results still pass
    /// through the staleness guard.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self
            .inner
            .task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("query client shut down");
    }

    /// Run one eviction pass now.
    pub fn evict_idle(&self) -> usize {
        self.inner.store.evict_idle(self.inner.config.keep_unused_for)
    }

    /// Refetch every subscribed entry if `event` is enabled in config.
    pub fn notify(&self, event: LifecycleEvent) -> Vec<JoinHandle<CommitOutcome>> {
        let enabled = match event {
            LifecycleEvent::Focus => self.inner.config.refetch_on_focus,
            LifecycleEvent::Reconnect => self.inner.config.refetch_on_reconnect,
        };
        if !enabled {
            trace!(%event, "lifecycle refetch disabled");
            return Vec::new();
        }

        let targets = self.inner.store.subscribed_queries();
        debug!(%event, queries = targets.len(), "lifecycle refetch");
        self.refetch(targets)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Subscribe to `descriptor`, issuing a fetch unless the entry is
    /// fresh or already loading.
    pub fn query(&self, descriptor: &QueryDescriptor) -> QuerySubscription<B> {
        let canonical = descriptor.canonical();
        let (key, receiver) = self.inner.store.subscribe(&canonical);
        self.ensure(&key, &canonical);
        QuerySubscription::new(self.clone(), key, canonical, receiver)
    }

    /// Unconditionally issue a fetch for `descriptor`, superseding any
    /// request already in flight for the same key.
    pub fn fetch(&self, descriptor: &QueryDescriptor) -> JoinHandle<CommitOutcome> {
        let canonical = descriptor.canonical();
        let key = self.inner.store.get_or_create(&canonical);
        self.spawn_fetch(&key, &canonical)
    }

    /// Current visible value of a rule.
    pub fn read_entity(&self, id: &RuleId) -> Option<Arc<Rule>> {
        self.inner.store.read_entity(id)
    }

    /// Issue a fetch for `key` only if the cached entry cannot serve it.
    pub(crate) fn ensure(
        &self,
        key: &QueryKey,
        query: &CanonicalQuery,
    ) -> Option<JoinHandle<CommitOutcome>> {
        match self.inner.store.freshness(key) {
            Freshness::Fresh => {
                trace!(key = %key, "cache hit");
                None
            }
            Freshness::InFlight => {
                trace!(key = %key, "joining in-flight request");
                None
            }
            Freshness::Stale => Some(self.spawn_fetch(key, query)),
        }
    }

    /// Take ownership of `key` now, then run the fetch as a task.
    pub(crate) fn spawn_fetch(
        &self,
        key: &QueryKey,
        query: &CanonicalQuery,
    ) -> JoinHandle<CommitOutcome> {
        let ticket = self.inner.store.begin_request(key);
        let client = self.clone();
        let query = query.clone();
        tokio::spawn(async move {
            match ticket {
                Some(ticket) => client.run_fetch(ticket, query).await,
                None => CommitOutcome::StaleDiscard,
            }
        })
    }

    async fn run_fetch(&self, ticket: RequestTicket, query: CanonicalQuery) -> CommitOutcome {
        let store = &self.inner.store;
        match self.inner.backend.fetch_rules(&query).await {
            Ok(rules) => store.commit_success(&ticket, rules),
            Err(err) => {
                warn!(key = %ticket.key, request = %ticket.id, error = %err, "rule fetch failed");
                store.commit_failure(&ticket, CoreError::from_fetch(err))
            }
        }
    }

    // ── Invalidation ─────────────────────────────────────────────────

    /// Mark entries carrying any of `tags` dirty and schedule refetches
    /// for the subscribed ones. Returns the scheduled fetches.
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Vec<JoinHandle<CommitOutcome>> {
        let targets = tags
            .iter()
            .flat_map(|tag| self.inner.store.invalidate(tag))
            .collect();
        self.refetch(targets)
    }

    /// Same as [`invalidate_tags`](Self::invalidate_tags), by key.
    pub fn invalidate_keys(&self, keys: &[QueryKey]) -> Vec<JoinHandle<CommitOutcome>> {
        let targets = keys
            .iter()
            .filter_map(|key| self.inner.store.invalidate_key(key))
            .collect();
        self.refetch(targets)
    }

    pub(crate) fn refetch(&self, targets: Vec<RefetchTarget>) -> Vec<JoinHandle<CommitOutcome>> {
        // One request per key even when several tags matched it.
        let unique: BTreeMap<QueryKey, CanonicalQuery> = targets
            .into_iter()
            .map(|target| (target.key, target.query))
            .collect();
        unique
            .iter()
            .map(|(key, query)| self.spawn_fetch(key, query))
            .collect()
    }
}

/// Periodically evict entries nobody has watched for `keep_for`.
async fn sweep_task(
    store: Arc<DataStore>,
    keep_for: Duration,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let evicted = store.evict_idle(keep_for);
                if evicted > 0 {
                    debug!(evicted, remaining = store.len(), "idle sweep");
                }
            }
        }
    }
}

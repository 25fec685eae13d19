// ── Reactive query subscriptions ──
//
// Handles vended by `QueryClient::query`: snapshot access, change
// notification, reload, and parameter changes that move the handle to
// another cache entry.

mod debounce;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

pub use debounce::ParamDebouncer;

use crate::backend::RuleBackend;
use crate::client::QueryClient;
use crate::query::{CanonicalQuery, QueryDescriptor, QueryKey};
use crate::store::{CommitOutcome, DataStore, QuerySnapshot, QueryStatus};

/// Keeps one subscriber registered on a cache entry until dropped.
struct SubscriberGuard {
    store: Arc<DataStore>,
    key: QueryKey,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.store.unsubscribe(&self.key);
    }
}

/// A live view of one query.
///
/// Counts as a subscriber of its cache entry for as long as it (or the
/// stream made from it) is alive.
pub struct QuerySubscription<B: RuleBackend> {
    client: QueryClient<B>,
    query: CanonicalQuery,
    receiver: watch::Receiver<QuerySnapshot>,
    guard: SubscriberGuard,
}

impl<B: RuleBackend> QuerySubscription<B> {
    pub(crate) fn new(
        client: QueryClient<B>,
        key: QueryKey,
        query: CanonicalQuery,
        receiver: watch::Receiver<QuerySnapshot>,
    ) -> Self {
        let guard = SubscriberGuard {
            store: Arc::clone(client.store()),
            key,
        };
        Self {
            client,
            query,
            receiver,
            guard,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.guard.key
    }

    pub fn query(&self) -> &CanonicalQuery {
        &self.query
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> QuerySnapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` if the entry has been evicted.
    pub async fn changed(&mut self) -> Option<QuerySnapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the entry is no longer loading.
    pub async fn settled(&mut self) -> Option<QuerySnapshot> {
        let snapshot = self
            .receiver
            .wait_for(|s| s.status != QueryStatus::Loading)
            .await
            .ok()?
            .clone();
        Some(snapshot)
    }

    /// Refetch now, even if the entry is fresh.
    pub fn reload(&self) -> JoinHandle<CommitOutcome> {
        self.client.spawn_fetch(&self.guard.key, &self.query)
    }

    /// Point this handle at `descriptor`.
    ///
    /// A descriptor with the same canonical key is a no-op. Otherwise the
    /// handle subscribes to the new entry (fetching it unless fresh or
    /// already loading) and releases the old one, whose in-flight
    /// request is left to finish.
    pub fn update_params(&mut self, descriptor: &QueryDescriptor) -> Option<JoinHandle<CommitOutcome>> {
        let next = descriptor.canonical();
        let next_key = next.key();
        if next_key == self.guard.key {
            return None;
        }

        let store = Arc::clone(self.client.store());
        let (key, receiver) = store.subscribe(&next);
        let handle = self.client.ensure(&key, &next);

        // Replacing the guard unsubscribes from the previous key.
        self.guard = SubscriberGuard { store, key };
        self.query = next;
        self.receiver = receiver;
        handle
    }

    /// Convert into a `Stream` yielding the current snapshot and then
    /// every change.
    pub fn into_stream(self) -> SnapshotStream {
        SnapshotStream {
            inner: WatchStream::new(self.receiver),
            _guard: self.guard,
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct SnapshotStream {
    inner: WatchStream<QuerySnapshot>,
    _guard: SubscriberGuard,
}

impl Stream for SnapshotStream {
    type Item = QuerySnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ── Optimistic writes ──
//
// Patch the entity table before the network call, confirm or roll back
// when the backend answers.

use tracing::{debug, info, warn};

use crate::backend::{BackendError, RuleBackend};
use crate::client::QueryClient;
use crate::error::CoreError;
use crate::model::{Rule, RuleId, RulePatch};
use crate::query::{QueryKey, Tag};
use crate::store::{DataStore, PendingWrite, Rollback};

/// Owns an applied optimistic patch until the write resolves.
///
/// Dropping it unresolved (the `mutate` future was cancelled) rolls the
/// patch back.
struct WriteGuard<'a> {
    store: &'a DataStore,
    write: Option<PendingWrite>,
}

impl<'a> WriteGuard<'a> {
    fn new(store: &'a DataStore, write: PendingWrite) -> Self {
        Self {
            store,
            write: Some(write),
        }
    }

    fn confirm(mut self, rule: Rule) {
        if let Some(write) = self.write.take() {
            self.store.confirm_write(write, rule);
        }
    }

    fn rollback(mut self) -> Option<Rollback> {
        self.write.take().map(|write| self.store.rollback_write(write))
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Some(write) = self.write.take() {
            let id = write.id.clone();
            let outcome = self.store.rollback_write(write);
            warn!(rule = %id, ?outcome, "rule update abandoned, rolled back");
        }
    }
}

impl<B: RuleBackend> QueryClient<B> {
    /// Apply `patch` to rule `id` optimistically, then write it through.
    ///
    /// The patched value is visible to every subscriber before this
    /// future first yields. On success the rule's tag, the list tag and
    /// `affected` are invalidated and the server's copy of the rule is
    /// returned. On failure the row is restored (or rebuilt from a newer
    /// server value, if one arrived meanwhile) and the error returned;
    /// nothing is invalidated. Dropping the future before the backend
    /// answers also rolls the patch back.
    ///
    /// Fails with [`CoreError::NotFound`] without calling the backend if
    /// the rule has never been loaded.
    pub async fn mutate(
        &self,
        id: &RuleId,
        patch: RulePatch,
        affected: &[QueryKey],
    ) -> Result<Rule, CoreError> {
        let store = self.store();
        let guard = WriteGuard::new(store, store.apply_optimistic(id, patch.clone())?);
        debug!(rule = %id, "optimistic patch applied");

        let result = self.backend().patch_rule(id, &patch).await.and_then(|updated| {
            if updated.id == *id {
                Ok(updated)
            } else {
                Err(BackendError::new(
                    format!("backend answered the write of {id} with rule {}", updated.id),
                    None,
                ))
            }
        });

        match result {
            Ok(updated) => {
                guard.confirm(updated.clone());
                let mut targets = store.invalidate(&Tag::Rule(id.clone()));
                targets.extend(store.invalidate(&Tag::List));
                targets.extend(affected.iter().filter_map(|key| store.invalidate_key(key)));
                let scheduled = self.refetch(targets).len();
                info!(rule = %id, refetches = scheduled, "rule updated");
                Ok(updated)
            }
            Err(err) => {
                let outcome = guard.rollback();
                warn!(rule = %id, ?outcome, error = %err, "rule update rejected, rolled back");
                Err(CoreError::from_write(id, err))
            }
        }
    }
}

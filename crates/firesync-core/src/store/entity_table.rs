// ── Normalized entity table ──
//
// One row per rule id, shared by every cache entry. A row keeps the last
// server-confirmed value and the optimistic patches still waiting for
// their write to resolve; readers see the server value with the pending
// patches replayed on top.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{Rule, RuleId, RulePatch};

/// Identifier of one in-flight optimistic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(pub(crate) u64);

/// Pre-mutation state captured by [`EntityTable::apply_optimistic`].
#[derive(Debug, Clone)]
pub(crate) struct Baseline {
    /// Exact visible value before the patch.
    pub value: Arc<Rule>,
    /// `as_of` of the server value the baseline was derived from.
    pub as_of: u64,
    /// Pending writes that were already layered when the snapshot was taken.
    pub pending: Vec<MutationId>,
}

/// How a failed write was undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// Row overwritten with the captured snapshot.
    Restored,
    /// A newer server value or another write landed meanwhile; the row
    /// was rebuilt from the current server value instead.
    Rebased,
    /// The row no longer exists.
    Missing,
}

#[derive(Debug)]
struct PendingPatch {
    mutation: MutationId,
    patch: RulePatch,
}

#[derive(Debug)]
struct EntityRow {
    visible: Arc<Rule>,
    server: Arc<Rule>,
    /// Logical time the server value describes: the issue time of the
    /// fetch that delivered it, or the commit time of a confirmed write.
    as_of: u64,
    pending: Vec<PendingPatch>,
}

impl EntityRow {
    fn new(rule: Rule, as_of: u64) -> Self {
        let server = Arc::new(rule);
        Self {
            visible: Arc::clone(&server),
            server,
            as_of,
            pending: Vec::new(),
        }
    }

    fn rebuild_visible(&mut self) {
        self.visible = if self.pending.is_empty() {
            Arc::clone(&self.server)
        } else {
            let layered = self
                .pending
                .iter()
                .fold((*self.server).clone(), |rule, p| rule.patched(&p.patch));
            Arc::new(layered)
        };
    }

    fn pending_ids(&self) -> Vec<MutationId> {
        self.pending.iter().map(|p| p.mutation).collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct EntityTable {
    rows: HashMap<RuleId, EntityRow>,
}

impl EntityTable {
    pub(crate) fn get(&self, id: &RuleId) -> Option<Arc<Rule>> {
        self.rows.get(id).map(|row| Arc::clone(&row.visible))
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    /// Write a server value observed by a request issued at `issued_at`.
    ///
    /// Ignored when the row already holds a value at least as fresh.
    /// Pending optimistic patches stay layered on top. Returns `true` if
    /// the visible value changed.
    pub(crate) fn upsert_server(&mut self, rule: Rule, issued_at: u64) -> bool {
        match self.rows.get_mut(&rule.id) {
            None => {
                self.rows
                    .insert(rule.id.clone(), EntityRow::new(rule, issued_at));
                true
            }
            Some(row) if row.as_of > issued_at => false,
            Some(row) => {
                let before = Arc::clone(&row.visible);
                row.server = Arc::new(rule);
                row.as_of = issued_at;
                row.rebuild_visible();
                *before != *row.visible
            }
        }
    }

    /// Layer `patch` on top of row `id` and return the pre-patch snapshot.
    pub(crate) fn apply_optimistic(
        &mut self,
        id: &RuleId,
        mutation: MutationId,
        patch: RulePatch,
    ) -> Option<Baseline> {
        let row = self.rows.get_mut(id)?;
        let baseline = Baseline {
            value: Arc::clone(&row.visible),
            as_of: row.as_of,
            pending: row.pending_ids(),
        };
        row.visible = Arc::new(row.visible.patched(&patch));
        row.pending.push(PendingPatch { mutation, patch });
        Some(baseline)
    }

    /// The write to row `id` succeeded: drop its pending patch and adopt
    /// the value the server returned, stamped with commit time `now`.
    ///
    /// The caller guarantees `rule.id == *id`.
    pub(crate) fn confirm(&mut self, id: &RuleId, mutation: MutationId, rule: Rule, now: u64) {
        match self.rows.get_mut(id) {
            None => {
                self.rows.insert(id.clone(), EntityRow::new(rule, now));
            }
            Some(row) => {
                row.pending.retain(|p| p.mutation != mutation);
                row.server = Arc::new(rule);
                row.as_of = now;
                row.rebuild_visible();
            }
        }
    }

    /// The write failed: remove every trace of its patch.
    pub(crate) fn rollback(
        &mut self,
        id: &RuleId,
        mutation: MutationId,
        baseline: Baseline,
    ) -> Rollback {
        let Some(row) = self.rows.get_mut(id) else {
            return Rollback::Missing;
        };
        row.pending.retain(|p| p.mutation != mutation);

        if row.as_of == baseline.as_of && row.pending_ids() == baseline.pending {
            row.visible = baseline.value;
            Rollback::Restored
        } else {
            row.rebuild_visible();
            Rollback::Rebased
        }
    }
}

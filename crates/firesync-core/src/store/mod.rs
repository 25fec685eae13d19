// ── Cache store ──
//
// Canonical query entries, the owning-request staleness guard, tag
// invalidation, and the normalized entity table behind them.

mod data_store;
mod entity_table;
mod entry;

pub use data_store::{DataStore, RefetchTarget};
pub(crate) use data_store::{Freshness, PendingWrite};
pub use entity_table::Rollback;
pub use entry::{CommitOutcome, QuerySnapshot, QueryStatus, RequestId, RequestTicket};

//! The job store contract.
//!
//! A [`JobStore`] owns every mutation of a query's scheduling state. All
//! time comparisons use the `now` passed in by the caller, so
//! implementations never consult a clock and never run background tasks.

use crate::config::LeasePolicy;
use crate::errors::StoreError;
use crate::schema::{NewQuery, Query, QueryKind};
use std::future::Future;

/// Seconds in one `update_interval` unit.
pub(crate) const SECONDS_PER_HOUR: i64 = 3600;

/// Persistence for queries and the only mutation paths for their
/// scheduling state.
///
/// # Implementation Notes
///
/// [`JobStore::claim`] must select and lease rows in one indivisible step.
/// Two concurrent claims must never return the same row.
pub trait JobStore: Clone + Send + Sync + 'static {
    /// Lease up to `policy.batch_size` claimable queries of `kind`.
    ///
    /// Every returned row has `status = in_progress` and `started_at = now`,
    /// and rows are ordered by ascending `id`. Returns an empty `Vec` when
    /// nothing is due.
    fn claim(
        &self,
        kind: QueryKind,
        now: i64,
        policy: &LeasePolicy,
    ) -> impl Future<Output = Result<Vec<Query>, StoreError>> + Send;

    /// Release the lease on query `id` and schedule its next run
    /// `update_interval` hours after `now`.
    ///
    /// Fails with [`StoreError::NotFound`] and changes nothing when no
    /// query has both this `id` and this `league`.
    fn reschedule(
        &self,
        id: i64,
        league: &str,
        now: i64,
        update_interval: i32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove query `id` permanently.
    fn delete(&self, id: i64) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert a new queued query and return its id.
    fn insert(&self, query: NewQuery) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Load a query by id.
    fn get(&self, id: i64) -> impl Future<Output = Result<Option<Query>, StoreError>> + Send;

    /// Whether a query of `kind` exists for `item_id`.
    ///
    /// When `league` is given only queries in that league count.
    fn contains(
        &self,
        kind: QueryKind,
        item_id: &str,
        league: Option<&str>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Close the store. Every later call fails with
    /// [`StoreError::Unavailable`].
    fn close(&self) -> impl Future<Output = ()> + Send;
}

pub(crate) fn next_run_after(now: i64, update_interval: i32) -> i64 {
    now.saturating_add(i64::from(update_interval).saturating_mul(SECONDS_PER_HOUR))
}

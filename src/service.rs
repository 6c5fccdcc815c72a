use crate::clock::{Clock, SystemClock};
use crate::config::LeasePolicy;
use crate::errors::StoreError;
use crate::schema::{NewQuery, Query, QueryKind};
use crate::store::JobStore;
use tracing::instrument;

/// The operations exposed to pollers and workers.
///
/// Binds a [`JobStore`] to a [`Clock`] and a [`LeasePolicy`] so callers
/// never supply scheduling state themselves. Cheap to clone when the store
/// is.
#[derive(Debug, Clone)]
pub struct JobService<S, C = SystemClock> {
    store: S,
    clock: C,
    policy: LeasePolicy,
}

impl<S: JobStore> JobService<S> {
    /// A service reading wall clock time with the default lease policy.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: JobStore, C: Clock> JobService<S, C> {
    /// A service reading time from `clock`.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            policy: LeasePolicy::default(),
        }
    }

    /// Replace the lease policy.
    pub fn lease_policy(mut self, policy: LeasePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The clock claims and reschedules are evaluated against.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The active lease policy.
    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    /// Lease the next batch of due queries from the `kind` pool.
    #[instrument(name = "queries.poll", skip(self))]
    pub async fn poll(&self, kind: QueryKind) -> Result<Vec<Query>, StoreError> {
        self.store
            .claim(kind, self.clock.now(), &self.policy)
            .await
    }

    /// Lease the next batch of one-shot ("info") queries.
    pub async fn poll_one_shot(&self) -> Result<Vec<Query>, StoreError> {
        self.poll(QueryKind::OneShot).await
    }

    /// Lease the next batch of recurring ("price") queries.
    pub async fn poll_recurring(&self) -> Result<Vec<Query>, StoreError> {
        self.poll(QueryKind::Recurring).await
    }

    /// Release a recurring query and schedule its next run
    /// `update_interval` hours from now.
    #[instrument(name = "queries.complete_recurring", skip(self))]
    pub async fn complete_recurring(
        &self,
        id: i64,
        league: &str,
        update_interval: i32,
    ) -> Result<(), StoreError> {
        self.store
            .reschedule(id, league, self.clock.now(), update_interval)
            .await
    }

    /// Remove a query for good.
    #[instrument(name = "queries.cancel", skip(self))]
    pub async fn cancel(&self, id: i64) -> Result<(), StoreError> {
        self.store.delete(id).await
    }

    /// Add a new query and return its id.
    #[instrument(name = "queries.enqueue", skip(self, query), fields(item_id = %query.item_id, kind = %query.kind()))]
    pub async fn enqueue(&self, query: NewQuery) -> Result<i64, StoreError> {
        self.store.insert(query).await
    }

    /// Finish a leased query the way its kind requires: one-shot queries
    /// are deleted, recurring ones rescheduled with their own interval.
    pub async fn complete(&self, query: &Query) -> Result<(), StoreError> {
        match query.kind() {
            QueryKind::OneShot => self.cancel(query.id).await,
            QueryKind::Recurring => {
                self.complete_recurring(query.id, &query.league, query.update_interval)
                    .await
            }
        }
    }

    /// Whether a one-shot query is already pending for `item_id`.
    pub async fn has_info_query(&self, item_id: &str) -> Result<bool, StoreError> {
        self.store.contains(QueryKind::OneShot, item_id, None).await
    }

    /// Whether a recurring query exists for `item_id` in `league`.
    pub async fn has_price_query(&self, item_id: &str, league: &str) -> Result<bool, StoreError> {
        self.store
            .contains(QueryKind::Recurring, item_id, Some(league))
            .await
    }

    /// Load a query by id.
    pub async fn get(&self, id: i64) -> Result<Option<Query>, StoreError> {
        self.store.get(id).await
    }

    /// Close the backing store.
    pub async fn close(&self) {
        self.store.close().await;
    }
}

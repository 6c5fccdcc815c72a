use crate::config::LeasePolicy;
use crate::errors::StoreError;
use crate::schema::{NewQuery, Query, QueryKind, QueryStatus};
use crate::store::{JobStore, next_run_after};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Table {
    last_id: i64,
    rows: BTreeMap<i64, Query>,
    closed: bool,
}

/// [`JobStore`] kept in process memory.
///
/// A single mutex guards the whole table, so a claim's scan and lease
/// happen without any other operation interleaving. Clones share the table.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    table: Arc<Mutex<Table>>,
}

impl MemoryJobStore {
    /// An empty, open store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored queries, leased or not.
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    /// Whether the store holds no queries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored query in id order.
    pub fn queries(&self) -> Vec<Query> {
        self.lock().rows.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // Every mutation completes before the guard drops, so a poisoned
        // table is still consistent.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<MutexGuard<'_, Table>, StoreError> {
        let table = self.lock();
        if table.closed {
            return Err(StoreError::Unavailable(sqlx::Error::PoolClosed));
        }
        Ok(table)
    }
}

impl JobStore for MemoryJobStore {
    async fn claim(
        &self,
        kind: QueryKind,
        now: i64,
        policy: &LeasePolicy,
    ) -> Result<Vec<Query>, StoreError> {
        let mut table = self.open()?;
        let lease_cutoff = policy.lease_cutoff(now);
        let batch_size = usize::try_from(policy.get_batch_size()).unwrap_or(usize::MAX);

        let claimed = table
            .rows
            .values_mut()
            .filter(|query| query.run_once == kind.run_once())
            .filter(|query| query.is_claimable(now, lease_cutoff))
            .take(batch_size)
            .map(|query| {
                query.status = QueryStatus::InProgress;
                query.started_at = now;
                query.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn reschedule(
        &self,
        id: i64,
        league: &str,
        now: i64,
        update_interval: i32,
    ) -> Result<(), StoreError> {
        let mut table = self.open()?;
        let query = table
            .rows
            .get_mut(&id)
            .filter(|query| query.league == league)
            .ok_or(StoreError::NotFound { id })?;

        query.next_run = next_run_after(now, update_interval);
        query.status = QueryStatus::Queued;
        query.started_at = 0;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut table = self.open()?;
        table
            .rows
            .remove(&id)
            .map(drop)
            .ok_or(StoreError::NotFound { id })
    }

    async fn insert(&self, query: NewQuery) -> Result<i64, StoreError> {
        let mut table = self.open()?;
        table.last_id += 1;
        let id = table.last_id;

        table.rows.insert(
            id,
            Query {
                id,
                item_id: query.item_id,
                realm: query.realm,
                league: query.league,
                search_query: query.search_query,
                update_interval: query.update_interval,
                next_run: query.next_run,
                status: QueryStatus::Queued,
                started_at: 0,
                run_once: query.run_once,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<Query>, StoreError> {
        Ok(self.open()?.rows.get(&id).cloned())
    }

    async fn contains(
        &self,
        kind: QueryKind,
        item_id: &str,
        league: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(self.open()?.rows.values().any(|query| {
            query.run_once == kind.run_once()
                && query.item_id == item_id
                && league.is_none_or(|league| query.league == league)
        }))
    }

    async fn close(&self) {
        self.lock().closed = true;
    }
}

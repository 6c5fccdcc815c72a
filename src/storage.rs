use crate::config::LeasePolicy;
use crate::errors::StoreError;
use crate::schema::{NewQuery, Query, QueryKind};
use crate::store::{JobStore, next_run_after};
use sqlx::PgPool;
use sqlx::migrate::MigrateError;
use tracing::debug;

/// Create the `queries` table and its indexes if they do not exist yet.
pub async fn setup_database(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Leases the next batch of claimable queries in a single statement.
///
/// The inner `SELECT` locks candidate rows with `SKIP LOCKED`, so a
/// concurrent claim passes over them instead of waiting. A row committed by
/// another claim in the meantime is re-checked against the predicate and
/// dropped, because its `started_at` is now fresh.
pub(crate) async fn claim_queries(
    pool: &PgPool,
    run_once: bool,
    now: i64,
    lease_cutoff: i64,
    batch_size: i64,
) -> Result<Vec<Query>, sqlx::Error> {
    sqlx::query_as::<_, Query>(
        r"
        WITH claimed AS (
            UPDATE queries
            SET status = 'in_progress', started_at = $1
            WHERE id IN (
                SELECT id
                FROM queries
                WHERE run_once = $2
                  AND next_run < $1
                  AND (status = 'queued' OR (status = 'in_progress' AND started_at < $3))
                ORDER BY id ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, item_id, realm, league, search_query, update_interval, next_run, status, started_at, run_once
        )
        SELECT id, item_id, realm, league, search_query, update_interval, next_run, status, started_at, run_once
        FROM claimed
        ORDER BY id ASC
        ",
    )
    .bind(now)
    .bind(run_once)
    .bind(lease_cutoff)
    .bind(batch_size)
    .fetch_all(pool)
    .await
}

/// Releases the lease and pushes `next_run` forward.
///
/// Returns the number of rows updated, 0 if `id` and `league` match nothing.
pub(crate) async fn reschedule_query(
    pool: &PgPool,
    id: i64,
    league: &str,
    next_run: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queries SET next_run = $1, status = 'queued', started_at = 0 WHERE id = $2 AND league = $3",
    )
    .bind(next_run)
    .bind(id)
    .bind(league)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Deletes a query, returning the number of rows removed.
pub(crate) async fn delete_query(pool: &PgPool, id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM queries WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn insert_query(pool: &PgPool, query: &NewQuery) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r"
        INSERT INTO queries (item_id, realm, league, search_query, update_interval, next_run, run_once)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        ",
    )
    .bind(&query.item_id)
    .bind(&query.realm)
    .bind(&query.league)
    .bind(&query.search_query)
    .bind(query.update_interval)
    .bind(query.next_run)
    .bind(query.run_once)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_query(pool: &PgPool, id: i64) -> Result<Option<Query>, sqlx::Error> {
    sqlx::query_as::<_, Query>(
        r"
        SELECT id, item_id, realm, league, search_query, update_interval, next_run, status, started_at, run_once
        FROM queries
        WHERE id = $1
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn query_exists(
    pool: &PgPool,
    run_once: bool,
    item_id: &str,
    league: Option<&str>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r"
        SELECT EXISTS(
            SELECT 1
            FROM queries
            WHERE item_id = $1
              AND run_once = $2
              AND ($3::TEXT IS NULL OR league = $3)
        )
        ",
    )
    .bind(item_id)
    .bind(run_once)
    .bind(league)
    .fetch_one(pool)
    .await
}

/// [`JobStore`] backed by a Postgres `queries` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Wrap an open connection pool. Run [`setup_database`] first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl JobStore for PgJobStore {
    async fn claim(
        &self,
        kind: QueryKind,
        now: i64,
        policy: &LeasePolicy,
    ) -> Result<Vec<Query>, StoreError> {
        let batch_size = i64::from(policy.get_batch_size());
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let lease_cutoff = policy.lease_cutoff(now);
        let queries =
            claim_queries(&self.pool, kind.run_once(), now, lease_cutoff, batch_size).await?;
        debug!(%kind, claimed = queries.len(), "Claimed queries");
        Ok(queries)
    }

    async fn reschedule(
        &self,
        id: i64,
        league: &str,
        now: i64,
        update_interval: i32,
    ) -> Result<(), StoreError> {
        let next_run = next_run_after(now, update_interval);
        match reschedule_query(&self.pool, id, league, next_run).await? {
            0 => Err(StoreError::NotFound { id }),
            _ => Ok(()),
        }
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        match delete_query(&self.pool, id).await? {
            0 => Err(StoreError::NotFound { id }),
            _ => Ok(()),
        }
    }

    async fn insert(&self, query: NewQuery) -> Result<i64, StoreError> {
        Ok(insert_query(&self.pool, &query).await?)
    }

    async fn get(&self, id: i64) -> Result<Option<Query>, StoreError> {
        Ok(find_query(&self.pool, id).await?)
    }

    async fn contains(
        &self,
        kind: QueryKind,
        item_id: &str,
        league: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(query_exists(&self.pool, kind.run_once(), item_id, league).await?)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

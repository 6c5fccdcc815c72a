//! Store scenarios shared by the in-memory and Postgres test suites.
//!
//! Every scenario takes a fresh, empty store.

use claims::{assert_matches, assert_none, assert_ok, assert_some};
use query_leases::{
    JobStore, LeasePolicy, NewQuery, Query, QueryKind, QueryStatus, StoreError,
};
use std::collections::HashSet;
use std::time::Duration;

pub const NOW: i64 = 1_750_000_000;
pub const LEASE_SECS: i64 = 300;

pub fn policy() -> LeasePolicy {
    LeasePolicy::default()
}

pub fn price_query(item_id: &str) -> NewQuery {
    NewQuery::recurring(item_id, "poe2", "Standard", r#"{"query":{"status":"online"}}"#, 24)
        .next_run(NOW - 1)
}

pub fn info_query(item_id: &str) -> NewQuery {
    NewQuery::one_shot(item_id, "poe2", "Standard", r#"{"query":{"name":"x"}}"#)
        .next_run(NOW - 1)
}

fn ids(queries: &[Query]) -> Vec<i64> {
    queries.iter().map(|query| query.id).collect()
}

pub async fn due_queries_are_claimed<S: JobStore>(store: S) -> anyhow::Result<()> {
    let due = store.insert(price_query("due")).await?;
    let later = store.insert(price_query("later").next_run(NOW + 60)).await?;
    let exactly_now = store.insert(price_query("now").next_run(NOW)).await?;

    let claimed = store.claim(QueryKind::Recurring, NOW, &policy()).await?;
    assert_eq!(ids(&claimed), vec![due]);
    assert_eq!(claimed[0].status, QueryStatus::InProgress);
    assert_eq!(claimed[0].started_at, NOW);

    for id in [later, exactly_now] {
        let query = assert_some!(store.get(id).await?);
        assert_eq!(query.status, QueryStatus::Queued);
        assert_eq!(query.started_at, 0);
    }

    // Still leased, and `later` is not due yet.
    let claimed = store.claim(QueryKind::Recurring, NOW + 1, &policy()).await?;
    assert_eq!(ids(&claimed), vec![exactly_now]);

    Ok(())
}

pub async fn claims_are_capped_to_the_oldest_ids<S: JobStore>(store: S) -> anyhow::Result<()> {
    let mut inserted = Vec::new();
    for i in 0..10 {
        inserted.push(store.insert(price_query(&format!("item-{i}"))).await?);
    }

    let first = store.claim(QueryKind::Recurring, NOW, &policy()).await?;
    assert_eq!(ids(&first), inserted[..4]);

    let second = store.claim(QueryKind::Recurring, NOW, &policy()).await?;
    assert_eq!(ids(&second), inserted[4..8]);

    let third = store.claim(QueryKind::Recurring, NOW, &policy()).await?;
    assert_eq!(ids(&third), inserted[8..]);

    let empty = store.claim(QueryKind::Recurring, NOW, &policy()).await?;
    assert!(empty.is_empty());

    let wide = policy().batch_size(20);
    let reclaimed = store
        .claim(QueryKind::Recurring, NOW + LEASE_SECS + 1, &wide)
        .await?;
    assert_eq!(ids(&reclaimed), inserted);

    Ok(())
}

pub async fn pools_are_isolated<S: JobStore>(store: S) -> anyhow::Result<()> {
    let info = store.insert(info_query("unique")).await?;
    let price = store.insert(price_query("unique")).await?;

    let one_shot = store.claim(QueryKind::OneShot, NOW, &policy()).await?;
    assert_eq!(ids(&one_shot), vec![info]);
    assert!(one_shot[0].run_once);

    let untouched = assert_some!(store.get(price).await?);
    assert_eq!(untouched.status, QueryStatus::Queued);

    let recurring = store.claim(QueryKind::Recurring, NOW, &policy()).await?;
    assert_eq!(ids(&recurring), vec![price]);
    assert!(!recurring[0].run_once);

    assert!(store.claim(QueryKind::OneShot, NOW, &policy()).await?.is_empty());
    assert!(store.claim(QueryKind::Recurring, NOW, &policy()).await?.is_empty());

    Ok(())
}

pub async fn stale_leases_are_reclaimed<S: JobStore>(store: S) -> anyhow::Result<()> {
    let id = store.insert(info_query("stale")).await?;

    let t0 = NOW;
    assert_eq!(ids(&store.claim(QueryKind::OneShot, t0, &policy()).await?), vec![id]);

    let before_expiry = store
        .claim(QueryKind::OneShot, t0 + LEASE_SECS - 1, &policy())
        .await?;
    assert!(before_expiry.is_empty());

    let at_expiry = store
        .claim(QueryKind::OneShot, t0 + LEASE_SECS, &policy())
        .await?;
    assert!(at_expiry.is_empty());

    let after_expiry = store
        .claim(QueryKind::OneShot, t0 + LEASE_SECS + 1, &policy())
        .await?;
    assert_eq!(ids(&after_expiry), vec![id]);
    assert_eq!(after_expiry[0].status, QueryStatus::InProgress);
    assert_eq!(after_expiry[0].started_at, t0 + LEASE_SECS + 1);

    // A shorter lease window makes the fresh lease stale sooner.
    let short = policy().lease_duration(Duration::from_secs(10));
    let reclaimed = store
        .claim(QueryKind::OneShot, t0 + LEASE_SECS + 12, &short)
        .await?;
    assert_eq!(ids(&reclaimed), vec![id]);

    Ok(())
}

pub async fn rescheduling_releases_the_lease<S: JobStore>(store: S) -> anyhow::Result<()> {
    let id = store.insert(price_query("scenario")).await?;

    let claimed = store.claim(QueryKind::Recurring, NOW, &policy()).await?;
    assert_eq!(ids(&claimed), vec![id]);
    assert_eq!(claimed[0].status, QueryStatus::InProgress);

    let query = &claimed[0];
    store
        .reschedule(query.id, &query.league, NOW, query.update_interval)
        .await?;

    let rescheduled = assert_some!(store.get(id).await?);
    assert_eq!(rescheduled.status, QueryStatus::Queued);
    assert_eq!(rescheduled.started_at, 0);
    assert_eq!(rescheduled.next_run, NOW + 24 * 3600);

    assert!(store.claim(QueryKind::Recurring, NOW, &policy()).await?.is_empty());

    let due_again = store
        .claim(QueryKind::Recurring, NOW + 24 * 3600 + 1, &policy())
        .await?;
    assert_eq!(ids(&due_again), vec![id]);

    Ok(())
}

pub async fn stale_league_reschedule_is_not_found<S: JobStore>(store: S) -> anyhow::Result<()> {
    let id = store.insert(price_query("league")).await?;
    store.claim(QueryKind::Recurring, NOW, &policy()).await?;
    let before = assert_some!(store.get(id).await?);

    let result = store.reschedule(id, "Hardcore", NOW, 24).await;
    assert_matches!(result, Err(StoreError::NotFound { id: missing }) if missing == id);

    let after = assert_some!(store.get(id).await?);
    assert_eq!(after, before);

    let result = store.reschedule(id + 1000, "Standard", NOW, 24).await;
    assert_matches!(result, Err(StoreError::NotFound { .. }));

    Ok(())
}

pub async fn deleted_queries_are_gone<S: JobStore>(store: S) -> anyhow::Result<()> {
    let id = store.insert(info_query("delete-me")).await?;
    store.claim(QueryKind::OneShot, NOW, &policy()).await?;

    assert_ok!(store.delete(id).await);
    assert_none!(store.get(id).await?);

    let result = store.delete(id).await;
    assert_matches!(result, Err(ref error) if error.is_not_found() && !error.is_retryable());

    let reclaimed = store
        .claim(QueryKind::OneShot, NOW + LEASE_SECS + 1, &policy())
        .await?;
    assert!(reclaimed.is_empty());

    Ok(())
}

pub async fn existence_checks_respect_kind_and_league<S: JobStore>(
    store: S,
) -> anyhow::Result<()> {
    store.insert(info_query("info-item")).await?;
    store.insert(price_query("price-item")).await?;

    assert!(store.contains(QueryKind::OneShot, "info-item", None).await?);
    assert!(!store.contains(QueryKind::Recurring, "info-item", None).await?);

    assert!(store.contains(QueryKind::Recurring, "price-item", Some("Standard")).await?);
    assert!(!store.contains(QueryKind::Recurring, "price-item", Some("Hardcore")).await?);
    assert!(!store.contains(QueryKind::OneShot, "price-item", None).await?);

    Ok(())
}

/// Many claimers race over the same pool; every query must be handed out
/// exactly once.
pub async fn concurrent_claims_are_disjoint<S: JobStore>(store: S) -> anyhow::Result<()> {
    const QUERIES: usize = 40;
    const CLAIMERS: usize = 8;

    let mut inserted = HashSet::new();
    for i in 0..QUERIES {
        inserted.insert(store.insert(price_query(&format!("race-{i}"))).await?);
    }

    let tasks = (0..CLAIMERS).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let batch = store.claim(QueryKind::Recurring, NOW, &policy()).await?;
                if batch.is_empty() {
                    return Ok::<_, StoreError>(claimed);
                }
                claimed.extend(batch.into_iter().map(|query| query.id));
                tokio::task::yield_now().await;
            }
        })
    });

    let mut seen = HashSet::new();
    for task in tasks.collect::<Vec<_>>() {
        for id in task.await?? {
            assert!(seen.insert(id), "query {id} was claimed twice");
        }
    }
    assert_eq!(seen, inserted);

    Ok(())
}

pub async fn closed_store_is_unavailable<S: JobStore>(store: S) -> anyhow::Result<()> {
    let id = store.insert(info_query("closing")).await?;
    store.close().await;

    let result = store.claim(QueryKind::OneShot, NOW, &policy()).await;
    assert_matches!(result, Err(ref error) if error.is_retryable());

    let result = store.delete(id).await;
    assert_matches!(result, Err(StoreError::Unavailable(_)));

    Ok(())
}

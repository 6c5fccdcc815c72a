//! Many pollers racing over one Postgres-backed store.
//!
//! Enqueues a mix of one-shot and recurring queries, starts a runner with
//! several pollers per pool and checks that every query was handled exactly
//! once. Uses TestContainers unless `--database-url` is given:
//!
//! ```bash
//! cargo run --example concurrent_pollers -- --queries 500 --workers 8
//! ```

use anyhow::{Result, bail};
use clap::Parser;
use query_leases::{
    JobService, LeasePolicy, NewQuery, PgJobStore, Query, QueryHandler, QueryKind, Runner,
    setup_database,
};
use rand::Rng;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Concurrent poller stress run
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of queries to enqueue
    #[arg(short, long, default_value_t = 200)]
    queries: usize,

    /// Number of pollers per pool
    #[arg(short, long, default_value_t = num_cpus::get())]
    workers: usize,

    /// Queries leased per poll
    #[arg(short, long, default_value_t = query_leases::DEFAULT_BATCH_SIZE)]
    batch_size: u32,

    /// Upper bound for the run (seconds)
    #[arg(short, long, default_value_t = 60)]
    duration: u64,

    /// Use an existing database instead of starting a container
    #[arg(long)]
    database_url: Option<String>,
}

const ITEMS: &[&str] = &[
    "Headhunter",
    "Mageblood",
    "Divine Orb",
    "Exalted Orb",
    "Chaos Orb",
    "Mirror of Kalandra",
    "Astramentis",
    "Kaom's Heart",
];

const LEAGUES: &[&str] = &["Standard", "Hardcore", "Dawn of the Hunt"];

/// Counts how often each query id was handed to a handler.
#[derive(Clone, Default)]
struct Tally {
    handled: Arc<Mutex<HashMap<i64, usize>>>,
}

impl Tally {
    fn record(&self, id: i64) {
        let mut handled = self
            .handled
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *handled.entry(id).or_default() += 1;
    }

    fn snapshot(&self) -> HashMap<i64, usize> {
        self.handled
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// Pretends to call the trade API.
struct SimulatedFetch;

impl QueryHandler for SimulatedFetch {
    type Context = Tally;

    async fn handle(&self, query: &Query, tally: Self::Context) -> Result<()> {
        let latency = rand::thread_rng().gen_range(5..40);
        sleep(Duration::from_millis(latency)).await;
        tally.record(query.id);
        Ok(())
    }
}

async fn connect(url: Option<&str>) -> Result<(PgPool, Option<ContainerAsync<Postgres>>)> {
    let (pool, container) = match url {
        Some(url) => {
            info!("Connecting to existing database...");
            (PgPool::connect(url).await?, None)
        }
        None => {
            info!("Starting PostgreSQL container...");
            let container = Postgres::default().start().await?;
            let host = container.get_host().await?;
            let port = container.get_host_port_ipv4(5432).await?;
            let url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
            (PgPool::connect(&url).await?, Some(container))
        }
    };

    info!("Running database migrations...");
    setup_database(&pool).await?;
    Ok((pool, container))
}

async fn enqueue_queries(service: &JobService<PgJobStore>, count: usize) -> Result<usize> {
    let start = Instant::now();
    let now = chrono::Utc::now().timestamp();

    for i in 0..count {
        let item = ITEMS[rand::thread_rng().gen_range(0..ITEMS.len())];
        let league = LEAGUES[rand::thread_rng().gen_range(0..LEAGUES.len())];
        let item_id = format!("{item}-{i}");
        let search = format!(r#"{{"query":{{"name":"{item}"}}}}"#);

        let query = if i % 3 == 0 {
            NewQuery::one_shot(item_id, "poe2", league, search)
        } else {
            NewQuery::recurring(item_id, "poe2", league, search, 24)
        };
        service.enqueue(query.next_run(now - 1)).await?;
    }

    let elapsed = start.elapsed();
    info!(
        "Enqueued {count} queries in {:.2}s ({:.0} queries/sec)",
        elapsed.as_secs_f64(),
        count as f64 / elapsed.as_secs_f64()
    );
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,concurrent_pollers=info,query_leases=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();

    let args = Args::parse();
    info!(
        queries = args.queries,
        workers = args.workers,
        batch_size = args.batch_size,
        "Starting concurrent poller run"
    );

    let (pool, _container) = connect(args.database_url.as_deref()).await?;
    let service = JobService::new(PgJobStore::new(pool))
        .lease_policy(LeasePolicy::default().batch_size(args.batch_size));

    let enqueued = enqueue_queries(&service, args.queries).await?;

    let tally = Tally::default();
    let runner = Runner::new(service.clone(), tally.clone())
        .shutdown_when_queue_empty()
        .configure_queue(QueryKind::OneShot, |queue| {
            queue
                .num_workers(args.workers)
                .poll_interval(Duration::from_millis(50))
                .jitter(Duration::from_millis(25))
                .handler(SimulatedFetch)
        })
        .configure_queue(QueryKind::Recurring, |queue| {
            queue
                .num_workers(args.workers)
                .poll_interval(Duration::from_millis(50))
                .jitter(Duration::from_millis(25))
                .handler(SimulatedFetch)
        });

    let start = Instant::now();
    let handle = runner.start();

    tokio::select! {
        _ = handle.wait_for_shutdown() => {
            info!("All pollers finished in {:.2}s", start.elapsed().as_secs_f64());
        }
        _ = sleep(Duration::from_secs(args.duration)) => {
            warn!("Run duration exceeded, pollers may still be working...");
        }
    }

    let handled = tally.snapshot();
    let duplicates: Vec<_> = handled.iter().filter(|(_, runs)| **runs > 1).collect();
    info!(
        handled = handled.len(),
        enqueued,
        duplicates = duplicates.len(),
        "Run complete"
    );

    if !duplicates.is_empty() {
        bail!("queries handled more than once: {duplicates:?}");
    }

    service.close().await;
    Ok(())
}

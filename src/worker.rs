use crate::clock::Clock;
use crate::errors::StoreError;
use crate::handler::ErasedHandler;
use crate::schema::{Query, QueryKind};
use crate::service::JobService;
use crate::store::JobStore;
use crate::util::{try_to_extract_panic_info, with_sentry_transaction};
use futures_util::FutureExt;
use rand::Rng;
use sentry_core::{Hub, SentryFutureExt};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info_span, trace, warn};

pub(crate) struct Worker<S, C, Context> {
    pub(crate) service: JobService<S, C>,
    pub(crate) kind: QueryKind,
    pub(crate) context: Context,
    pub(crate) handler: ErasedHandler<Context>,
    pub(crate) shutdown_when_queue_empty: bool,
    pub(crate) poll_interval: Duration,
    pub(crate) jitter: Duration,
}

impl<S: JobStore, C: Clock, Context: Clone + Send + Sync + 'static> Worker<S, C, Context> {
    /// Calculate the sleep duration with random jitter applied.
    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.poll_interval;
        }

        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.poll_interval + Duration::from_millis(random_jitter)
    }

    /// Poll and handle batches forever, or until a poll comes back empty if
    /// `shutdown_when_queue_empty` is set.
    #[allow(clippy::cognitive_complexity)]
    pub(crate) async fn run(&self) {
        loop {
            match self.run_next_batch().await {
                Ok(0) if self.shutdown_when_queue_empty => {
                    debug!("No due queries found. Shutting down the worker…");
                    break;
                }
                Ok(0) => {
                    let sleep_duration = self.sleep_duration_with_jitter();
                    trace!("No due queries found. Polling again in {sleep_duration:?}…");
                    sleep(sleep_duration).await;
                }
                Ok(_) => {}
                Err(error) => {
                    error!("Failed to poll queries: {error}");
                    sleep(self.sleep_duration_with_jitter()).await;
                }
            }
        }
    }

    /// Lease the next batch and handle every query in it, in id order.
    ///
    /// Returns the number of queries leased. Only a failed poll is an
    /// error; handler and completion failures are logged per query.
    async fn run_next_batch(&self) -> Result<usize, StoreError> {
        trace!("Looking for due queries…");

        let queries = self.service.poll(self.kind).await?;
        let count = queries.len();

        for query in queries {
            let span = info_span!("query", query.id = %query.id, query.item_id = %query.item_id);
            self.run_query(query).instrument(span).await;
        }

        Ok(count)
    }

    async fn run_query(&self, query: Query) {
        let context = self.context.clone();
        let handler = &self.handler;

        debug!("Running query handler…");

        let future = with_sentry_transaction(handler.name(), || {
            AssertUnwindSafe(handler.run(query.clone(), context))
                .catch_unwind()
                .map(|result| {
                    result
                        .map_err(|e| try_to_extract_panic_info(&*e))
                        .and_then(std::convert::identity)
                })
        });

        if let Err(error) = future.bind_hub(Hub::current()).await {
            warn!("Query handler failed, leaving the lease to expire: {error}");
            return;
        }

        match self.service.complete(&query).await {
            Ok(()) => debug!("Completed query"),
            Err(StoreError::NotFound { .. }) => {
                warn!("Query was removed or changed league while leased; nothing to complete");
            }
            Err(error) => error!("Failed to complete query: {error}"),
        }
    }
}

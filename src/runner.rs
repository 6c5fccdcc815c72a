use crate::clock::Clock;
use crate::handler::{ErasedHandler, QueryHandler};
use crate::schema::QueryKind;
use crate::service::JobService;
use crate::store::JobStore;
use crate::worker::Worker;
use futures_util::future::join_all;
use sealed::QueueState;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info, info_span, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_JITTER: Duration = Duration::from_millis(100);

/// Marker type for a configured runner
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Configured;
/// Marker type for an unconfigured runner
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Unconfigured;

/// Spawns pollers that lease queries and hand them to a [`QueryHandler`]
pub struct Runner<S, C, Context, State = Unconfigured> {
    service: JobService<S, C>,
    queues: HashMap<QueryKind, Queue<Context, Configured>>,
    context: Context,
    shutdown_when_queue_empty: bool,
    _state: PhantomData<State>,
}

impl<S, C, Context: std::fmt::Debug, State: std::fmt::Debug>
    std::fmt::Debug for Runner<S, C, Context, State>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("context", &self.context)
            .field("shutdown_when_queue_empty", &self.shutdown_when_queue_empty)
            .finish()
    }
}

impl<S: JobStore, C: Clock, Context: Clone + Send + Sync + 'static> Runner<S, C, Context> {
    /// Create a new runner polling through `service` and handing `context`
    /// to every handler call.
    pub fn new(service: JobService<S, C>, context: Context) -> Self {
        Self {
            service,
            queues: HashMap::new(),
            context,
            shutdown_when_queue_empty: false,
            _state: PhantomData,
        }
    }
}

impl<S: JobStore, C: Clock, Context: Clone + Send + Sync + 'static, State>
    Runner<S, C, Context, State>
{
    /// Configure the pollers for one query pool
    pub fn configure_queue(
        mut self,
        kind: QueryKind,
        config_fn: impl FnOnce(Queue<Context>) -> Queue<Context, Configured>,
    ) -> Runner<S, C, Context, Configured> {
        self.queues.insert(kind, config_fn(Queue::default()));

        Runner {
            service: self.service,
            queues: self.queues,
            context: self.context,
            shutdown_when_queue_empty: self.shutdown_when_queue_empty,
            _state: PhantomData,
        }
    }

    /// Stop each poller once a poll returns no due queries.
    pub fn shutdown_when_queue_empty(mut self) -> Self {
        self.shutdown_when_queue_empty = true;
        self
    }
}

impl<S: JobStore, C: Clock, Context: Clone + Send + Sync + 'static>
    Runner<S, C, Context, Configured>
{
    /// Start the pollers.
    ///
    /// This returns a `RunHandle` which can be used to wait for the pollers to shutdown.
    pub fn start(&self) -> RunHandle {
        let mut handles = Vec::new();
        for (kind, queue) in &self.queues {
            for i in 1..=queue.num_workers {
                let name = format!("query-poller-{kind}-{i}");
                info!(worker.name = %name, "Starting poller…");

                let worker = Worker {
                    service: self.service.clone(),
                    kind: *kind,
                    context: self.context.clone(),
                    handler: queue.handler.clone(),
                    shutdown_when_queue_empty: self.shutdown_when_queue_empty,
                    poll_interval: queue.poll_interval,
                    jitter: queue.jitter,
                };

                let span = info_span!("worker", worker.name = %name);
                let handle = tokio::spawn(async move { worker.run().instrument(span).await });

                handles.push(handle);
            }
        }

        RunHandle { handles }
    }
}

/// Handle to a running set of pollers
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// Wait for all pollers to shut down.
    pub async fn wait_for_shutdown(self) {
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(error) = result {
                log_poller_exit(&error);
            }
        });
    }

    /// Stop every poller without waiting for in-flight handlers.
    ///
    /// Queries leased at that moment are picked up again once their lease
    /// expires.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Log a poller task that did not return normally and report why it ended.
fn log_poller_exit(error: &JoinError) -> PollerExit {
    if error.is_cancelled() {
        debug!("Query poller task was aborted");
        PollerExit::Aborted
    } else {
        warn!(%error, "Query poller task panicked");
        PollerExit::Panicked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollerExit {
    Aborted,
    Panicked,
}

mod sealed {
    /// Ties a queue's typestate to what it stores as its handler.
    pub trait QueueState<Context> {
        type Handler;
    }
}

impl<Context> QueueState<Context> for Unconfigured {
    type Handler = ();
}

impl<Context> QueueState<Context> for Configured {
    type Handler = ErasedHandler<Context>;
}

/// Poller configuration for one query pool
pub struct Queue<Context, State: QueueState<Context> = Unconfigured> {
    handler: State::Handler,
    num_workers: usize,
    poll_interval: Duration,
    jitter: Duration,
    _state: PhantomData<State>,
}

impl<Context, State: QueueState<Context>> std::fmt::Debug for Queue<Context, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("num_workers", &self.num_workers)
            .field("poll_interval", &self.poll_interval)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<Context> Default for Queue<Context, Unconfigured> {
    fn default() -> Self {
        Self {
            handler: (),
            num_workers: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: DEFAULT_JITTER,
            _state: PhantomData,
        }
    }
}

impl<Context: Clone + Send + 'static, State: QueueState<Context>> Queue<Context, State> {
    /// Set the number of pollers for this pool.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set how long a poller waits after an empty poll.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the maximum random jitter to add to poll intervals.
    ///
    /// Jitter spreads out pollers that would otherwise hit the store in
    /// lockstep. The actual jitter applied will be a random value between 0
    /// and the specified duration.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the handler run for every query leased from this pool.
    pub fn handler<H: QueryHandler<Context = Context>>(
        self,
        handler: H,
    ) -> Queue<Context, Configured> {
        Queue {
            handler: ErasedHandler::new(handler),
            num_workers: self.num_workers,
            poll_interval: self.poll_interval,
            jitter: self.jitter,
            _state: PhantomData,
        }
    }
}

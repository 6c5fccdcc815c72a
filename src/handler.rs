use crate::schema::Query;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Trait for the work a poller performs on each leased query.
///
/// Returning `Ok(())` completes the query: one-shot queries are deleted and
/// recurring queries are rescheduled. Returning an error (or panicking)
/// leaves the lease in place, so the query is retried once it expires.
pub trait QueryHandler: Send + Sync + 'static {
    /// The application data provided to this handler at runtime.
    type Context: Clone + Send + 'static;

    /// Process one leased query.
    fn handle(
        &self,
        query: &Query,
        ctx: Self::Context,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

type RunHandlerFn<Context> =
    dyn Fn(Query, Context) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A [`QueryHandler`] with its concrete type erased.
pub struct ErasedHandler<Context> {
    name: &'static str,
    run: Arc<RunHandlerFn<Context>>,
}

impl<Context> Clone for ErasedHandler<Context> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            run: self.run.clone(),
        }
    }
}

impl<Context> std::fmt::Debug for ErasedHandler<Context> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<Context: Clone + Send + 'static> ErasedHandler<Context> {
    pub(crate) fn new<H: QueryHandler<Context = Context>>(handler: H) -> Self {
        let handler = Arc::new(handler);
        let run: Arc<RunHandlerFn<Context>> = Arc::new(move |query: Query, ctx: Context| {
            let handler = handler.clone();
            async move { handler.handle(&query, ctx).await }.boxed()
        });

        Self {
            name: std::any::type_name::<H>(),
            run,
        }
    }

    /// Type name of the wrapped handler, used as the sentry transaction name.
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn run(&self, query: Query, ctx: Context) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.run)(query, ctx)
    }
}

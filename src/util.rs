use anyhow::anyhow;
use sentry_core::protocol::SpanStatus;
use sentry_core::{Hub, SentryFutureExt};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// Run `callback` inside a fresh sentry transaction named `transaction_name`.
///
/// The callback runs on its own hub whose scope carries the transaction, so
/// events and child spans it records are attached to it.
pub(crate) async fn with_sentry_transaction<F, Fut, R, E>(
    transaction_name: &str,
    callback: F,
) -> Result<R, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let hub = Arc::new(Hub::new_from_top(Hub::current()));
    let tx_ctx = sentry_core::TransactionContext::new(transaction_name, "queue.query");
    let tx = sentry_core::start_transaction(tx_ctx);
    hub.configure_scope(|scope| scope.set_span(Some(tx.clone().into())));

    let result = callback().bind_hub(hub).await;

    tx.set_status(if result.is_ok() {
        SpanStatus::Ok
    } else {
        SpanStatus::UnknownError
    });
    tx.finish();

    result
}

/// Turn a `catch_unwind` payload into an error, keeping the panic message
/// when there is one.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send + 'static)) -> anyhow::Error {
    if let Some(message) = info.downcast_ref::<&'static str>() {
        anyhow!("query handler panicked: {message}")
    } else if let Some(message) = info.downcast_ref::<String>() {
        anyhow!("query handler panicked: {message}")
    } else {
        anyhow!("query handler panicked")
    }
}

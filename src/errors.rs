use crate::schema::UnknownStatus;

/// Error type for job store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached, timed out or was closed.
    ///
    /// No query state was changed; the whole call may be retried.
    #[error("job store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    /// The targeted query does not exist, or its league no longer matches.
    ///
    /// Retrying will not make the row appear.
    #[error("query {id} not found")]
    NotFound {
        /// Id passed by the caller.
        id: i64,
    },

    /// The store refused the call or returned rows this crate cannot read.
    ///
    /// Covers constraint violations and column decode failures. Repeating
    /// the same call fails the same way.
    #[error("job store rejected the operation: {0}")]
    Rejected(#[source] sqlx::Error),

    /// A stored row carries a status this crate does not know.
    #[error(transparent)]
    InvalidStatus(#[from] UnknownStatus),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::ColumnDecode { source, .. } = &error {
            if let Some(UnknownStatus(status)) = source.downcast_ref::<UnknownStatus>() {
                return Self::InvalidStatus(UnknownStatus(status.clone()));
            }
        }

        if is_transient(&error) {
            Self::Unavailable(error)
        } else {
            Self::Rejected(error)
        }
    }
}

/// Whether `error` comes from the connection, the pool or a conflict with a
/// concurrent transaction rather than from the statement or the data.
fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(error) => error
            .code()
            .is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

/// Postgres error codes for faults that go away on their own: connection
/// exceptions, serialization failures and deadlocks, lock timeouts, server
/// shutdown and connection exhaustion.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || matches!(code, "40001" | "40P01" | "55P03" | "57P01" | "57P02" | "57P03" | "53300")
}

impl StoreError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Whether the call targeted a missing or mismatched row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

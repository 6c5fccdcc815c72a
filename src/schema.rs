//! Row types for the `queries` table.
//!
//! A [`Query`] is the unit of scheduled work: a pending data fetch for one
//! item. Scheduling state (`status`, `started_at`, `next_run`) is only ever
//! written by the store implementations.

use serde::{Deserialize, Serialize};
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgTypeInfo, PgValueRef, Postgres};
use sqlx::{Decode, FromRow, Type};
use std::fmt;

/// Lifecycle state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// Waiting for `next_run` to pass. Never leased.
    #[default]
    Queued,
    /// Leased by a poller at `started_at`. Becomes claimable again once the
    /// lease has expired.
    InProgress,
}

impl QueryStatus {
    /// The text stored in the `status` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `status` column value that is neither `queued` nor `in_progress`.
#[derive(Debug, thiserror::Error)]
#[error("unknown query status {0:?}")]
pub struct UnknownStatus(pub String);

impl TryFrom<String> for QueryStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            _ => Err(UnknownStatus(value)),
        }
    }
}

impl Type<Postgres> for QueryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for QueryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let status = <&str as Decode<'r, Postgres>>::decode(value)?;
        Ok(Self::try_from(status.to_owned())?)
    }
}

/// Which eligibility pool a query belongs to.
///
/// The two pools never overlap: a claim for one kind never returns or
/// touches rows of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// "Info" queries, processed once and then deleted (`run_once = true`).
    OneShot,
    /// "Price" queries, rescheduled after every run (`run_once = false`).
    Recurring,
}

impl QueryKind {
    /// The value of the `run_once` column for this pool.
    pub const fn run_once(self) -> bool {
        matches!(self, Self::OneShot)
    }

    /// Short name used in worker and span names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneShot => "one_shot",
            Self::Recurring => "recurring",
        }
    }
}

impl From<bool> for QueryKind {
    fn from(run_once: bool) -> Self {
        if run_once { Self::OneShot } else { Self::Recurring }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a query record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Query {
    /// Unique, monotonically assigned identifier. Claims are ordered by it.
    pub id: i64,
    /// Item this query fetches data for.
    pub item_id: String,
    /// Partitioning context, opaque to the store.
    pub realm: String,
    /// Partitioning context, opaque to the store.
    pub league: String,
    /// Payload handed to the external fetch.
    pub search_query: String,
    /// Recurrence period in hours. Unused for one-shot queries.
    pub update_interval: i32,
    /// Unix timestamp after which the query may be claimed.
    pub next_run: i64,
    /// Current lifecycle state.
    pub status: QueryStatus,
    /// Unix timestamp of the current lease, 0 when not leased.
    pub started_at: i64,
    /// `true` for one-shot queries.
    pub run_once: bool,
}

impl Query {
    /// The pool this query is claimed from.
    pub fn kind(&self) -> QueryKind {
        QueryKind::from(self.run_once)
    }

    /// Whether a claim evaluated at `now` may lease this query.
    ///
    /// `lease_cutoff` is `now - lease_duration`; leases that started before
    /// it are stale.
    pub fn is_claimable(&self, now: i64, lease_cutoff: i64) -> bool {
        if self.next_run >= now {
            return false;
        }

        match self.status {
            QueryStatus::Queued => true,
            QueryStatus::InProgress => self.started_at < lease_cutoff,
        }
    }
}

/// Insert payload for a new query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuery {
    /// Item this query fetches data for.
    pub item_id: String,
    /// Partitioning context.
    pub realm: String,
    /// Partitioning context.
    pub league: String,
    /// Payload handed to the external fetch.
    pub search_query: String,
    /// Recurrence period in hours.
    pub update_interval: i32,
    /// Earliest unix timestamp at which the query is due. 0 means now.
    pub next_run: i64,
    /// `true` for one-shot queries.
    pub run_once: bool,
}

impl NewQuery {
    /// A one-shot ("info") query, due immediately.
    pub fn one_shot(
        item_id: impl Into<String>,
        realm: impl Into<String>,
        league: impl Into<String>,
        search_query: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            realm: realm.into(),
            league: league.into(),
            search_query: search_query.into(),
            update_interval: 0,
            next_run: 0,
            run_once: true,
        }
    }

    /// A recurring ("price") query, due immediately and then every
    /// `update_interval` hours.
    pub fn recurring(
        item_id: impl Into<String>,
        realm: impl Into<String>,
        league: impl Into<String>,
        search_query: impl Into<String>,
        update_interval: i32,
    ) -> Self {
        Self {
            update_interval,
            run_once: false,
            ..Self::one_shot(item_id, realm, league, search_query)
        }
    }

    /// Delay the first run until after `next_run`.
    pub fn next_run(mut self, next_run: i64) -> Self {
        self.next_run = next_run;
        self
    }

    /// The pool the query will be claimed from.
    pub fn kind(&self) -> QueryKind {
        QueryKind::from(self.run_once)
    }
}

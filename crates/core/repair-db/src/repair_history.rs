//! Per-range repair attempt log
//!
//! Append-only record of every repair session the daemon drives: which
//! range of which table, on which host, when, and how it ended. Operators
//! and the reporting surface read it; the scheduler only writes.

use chrono::{DateTime, Utc};
use topology::{NodeId, TableReference, TokenRange};
use uuid::Uuid;

pub(crate) mod sql;

use crate::{Executor, error::Error};

/// Appends a history row for a repair session that just began.
///
/// Returns the row id, used to close the session later.
#[tracing::instrument(skip(exe), err)]
pub async fn session_started<'c, E>(
    exe: E,
    host_id: NodeId,
    table: &TableReference,
    range: TokenRange,
) -> Result<i64, Error>
where
    E: Executor<'c>,
{
    sql::insert_started(
        exe,
        host_id.as_uuid(),
        table.keyspace(),
        table.table(),
        table.id(),
        range,
    )
    .await
    .map_err(Error::Database)
}

/// Closes a previously opened repair session with its outcome.
#[tracing::instrument(skip(exe), err)]
pub async fn session_closed<'c, E>(
    exe: E,
    session_id: i64,
    status: SessionStatus,
) -> Result<(), Error>
where
    E: Executor<'c>,
{
    sql::mark_closed(exe, session_id, status)
        .await
        .map_err(Error::Database)
}

/// Returns the most recent sessions for a table, newest first.
#[tracing::instrument(skip(exe), err)]
pub async fn list_for_table<'c, E>(
    exe: E,
    table_id: Uuid,
    limit: i64,
) -> Result<Vec<HistoryRow>, Error>
where
    E: Executor<'c>,
{
    sql::list_for_table(exe, table_id, limit)
        .await
        .map_err(Error::Database)
}

/// The outcome of a repair session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The session is still running.
    Started,
    /// The session repaired the range.
    Success,
    /// The database reported the range as already consistent.
    Skipped,
    /// The session failed; the range stays pending.
    Failed,
}

impl SessionStatus {
    /// Convert the [`SessionStatus`] to a string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = Box<dyn std::error::Error + Send + Sync>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.eq_ignore_ascii_case("started") => Ok(Self::Started),
            s if s.eq_ignore_ascii_case("success") => Ok(Self::Success),
            s if s.eq_ignore_ascii_case("skipped") => Ok(Self::Skipped),
            s if s.eq_ignore_ascii_case("failed") => Ok(Self::Failed),
            _ => Err(format!("Invalid session status: {s}").into()),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for SessionStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("TEXT")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for SessionStatus {
    fn decode(
        value: <sqlx::Postgres as sqlx::Database>::ValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let value: &str = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
        value.parse()
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for SessionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        sqlx::Encode::<sqlx::Postgres>::encode_by_ref(&self.as_str(), buf)
    }
}

/// A repair history row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    /// Row id
    pub id: i64,

    /// The host that drove the session
    pub host_id: Uuid,

    /// Keyspace name of the repaired table
    pub keyspace_name: String,

    /// Table name of the repaired table
    pub table_name: String,

    /// Stable id of the repaired table
    pub table_id: Uuid,

    /// Exclusive start token of the repaired range
    pub range_start: i64,

    /// Inclusive end token of the repaired range
    pub range_end: i64,

    /// Session outcome
    pub status: SessionStatus,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// When the session closed
    pub finished_at: Option<DateTime<Utc>>,
}

impl HistoryRow {
    /// The repaired range.
    #[must_use]
    pub fn range(&self) -> TokenRange {
        TokenRange::new(self.range_start, self.range_end)
    }
}

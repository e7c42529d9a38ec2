use sqlx::{Executor, Postgres};
use topology::TokenRange;
use uuid::Uuid;

use super::{HistoryRow, SessionStatus};

/// Inserts a history row for a session that just began.
#[tracing::instrument(skip(exe), err)]
pub async fn insert_started<'c, E>(
    exe: E,
    host_id: Uuid,
    keyspace_name: &str,
    table_name: &str,
    table_id: Uuid,
    range: TokenRange,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO repair_history (
            host_id, keyspace_name, table_name, table_id,
            range_start, range_end, status, started_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, timezone('UTC', now()))
        RETURNING id
    "#};
    sqlx::query_scalar(query)
        .bind(host_id)
        .bind(keyspace_name)
        .bind(table_name)
        .bind(table_id)
        .bind(range.start())
        .bind(range.end())
        .bind(SessionStatus::Started)
        .fetch_one(exe)
        .await
}

/// Closes a session row with its outcome.
#[tracing::instrument(skip(exe), err)]
pub async fn mark_closed<'c, E>(
    exe: E,
    session_id: i64,
    status: SessionStatus,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE repair_history
        SET status = $2, finished_at = timezone('UTC', now())
        WHERE id = $1
    "#};
    sqlx::query(query)
        .bind(session_id)
        .bind(status)
        .execute(exe)
        .await?;
    Ok(())
}

/// Returns the most recent sessions for a table, newest first.
#[tracing::instrument(skip(exe), err)]
pub async fn list_for_table<'c, E>(
    exe: E,
    table_id: Uuid,
    limit: i64,
) -> Result<Vec<HistoryRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, host_id, keyspace_name, table_name, table_id,
               range_start, range_end, status, started_at, finished_at
        FROM repair_history
        WHERE table_id = $1
        ORDER BY started_at DESC, id DESC
        LIMIT $2
    "#};
    sqlx::query_as(query)
        .bind(table_id)
        .bind(limit)
        .fetch_all(exe)
        .await
}

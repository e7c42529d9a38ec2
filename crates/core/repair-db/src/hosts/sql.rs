use std::time::Duration;

use sqlx::{Executor, Postgres, postgres::types::PgInterval};
use uuid::Uuid;

use super::Host;

/// Registers a host.
///
/// If the host already exists, its `registered_at` and `heartbeat_at`
/// columns are updated. The `created_at` column is set only on the initial
/// insert.
#[tracing::instrument(skip(exe), err)]
pub async fn register<'c, E>(exe: E, host_id: Uuid) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO hosts (host_id, created_at, registered_at, heartbeat_at)
        VALUES ($1, timezone('UTC', now()), timezone('UTC', now()), timezone('UTC', now()))
        ON CONFLICT (host_id) DO UPDATE SET
            registered_at = timezone('UTC', now()),
            heartbeat_at = timezone('UTC', now())
    "#};
    sqlx::query(query).bind(host_id).execute(exe).await?;
    Ok(())
}

/// Updates the `heartbeat_at` column for a given host
#[tracing::instrument(skip(exe), err)]
pub async fn update_heartbeat<'c, E>(exe: E, host_id: Uuid) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE hosts
        SET heartbeat_at = timezone('UTC', now())
        WHERE host_id = $1
    "#};
    sqlx::query(query).bind(host_id).execute(exe).await?;
    Ok(())
}

/// Returns a host by its ID.
#[tracing::instrument(skip(exe), err)]
pub async fn get_by_id<'c, E>(exe: E, host_id: Uuid) -> Result<Option<Host>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT host_id, created_at, registered_at, heartbeat_at
        FROM hosts
        WHERE host_id = $1
    "#};
    sqlx::query_as(query).bind(host_id).fetch_optional(exe).await
}

/// Returns a list of active hosts.
///
/// A host is active if its `heartbeat_at` timestamp is within the given
/// active `interval`.
#[tracing::instrument(skip(exe), err)]
pub async fn list_active<'c, E>(exe: E, interval: Duration) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT host_id
        FROM hosts
        WHERE heartbeat_at > timezone('UTC', now()) - $1
    "#};
    sqlx::query_scalar(query)
        .bind(PgInterval {
            microseconds: interval.as_micros() as i64,
            ..Default::default()
        })
        .fetch_all(exe)
        .await
}

/// Locks a PG advisory lock on the given host ID.
///
/// Returns whether the lock was successfully acquired. The lock is held for
/// as long as the connection stays open.
#[tracing::instrument(skip(exe), err)]
pub async fn lock_host_id<'c, E>(exe: E, host_id: Uuid) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT pg_try_advisory_lock(hashtextextended($1::text, 0))
    "#};
    sqlx::query_scalar(query).bind(host_id).fetch_one(exe).await
}

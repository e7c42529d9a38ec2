use std::time::Duration;

use sqlx::{Executor, Postgres, postgres::types::PgInterval};
use uuid::Uuid;

use super::LeaseRow;

fn interval(duration: Duration) -> PgInterval {
    PgInterval {
        microseconds: duration.as_micros() as i64,
        ..Default::default()
    }
}

/// Acquires the lease on `resource`, stealing it when expired.
///
/// The conditional upsert succeeds when the resource is free, its current
/// lease has expired, or the caller already holds it (refresh). Any other
/// state leaves the row untouched and returns no row.
#[tracing::instrument(skip(exe), err)]
pub async fn try_acquire<'c, E>(
    exe: E,
    resource: &str,
    holder: Uuid,
    duration: Duration,
) -> Result<Option<LeaseRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO repair_leases (resource, holder, acquired_at, expires_at)
        VALUES ($1, $2, timezone('UTC', now()), timezone('UTC', now()) + $3)
        ON CONFLICT (resource) DO UPDATE SET
            holder = EXCLUDED.holder,
            acquired_at = EXCLUDED.acquired_at,
            expires_at = EXCLUDED.expires_at
        WHERE repair_leases.expires_at < timezone('UTC', now())
              OR repair_leases.holder = EXCLUDED.holder
        RETURNING resource, holder, acquired_at, expires_at
    "#};
    sqlx::query_as(query)
        .bind(resource)
        .bind(holder)
        .bind(interval(duration))
        .fetch_optional(exe)
        .await
}

/// Extends a lease currently held by `holder`.
#[tracing::instrument(skip(exe), err)]
pub async fn renew<'c, E>(
    exe: E,
    resource: &str,
    holder: Uuid,
    duration: Duration,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE repair_leases
        SET expires_at = timezone('UTC', now()) + $3
        WHERE resource = $1 AND holder = $2
    "#};
    let result = sqlx::query(query)
        .bind(resource)
        .bind(holder)
        .bind(interval(duration))
        .execute(exe)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Deletes a lease currently held by `holder`.
#[tracing::instrument(skip(exe), err)]
pub async fn release<'c, E>(exe: E, resource: &str, holder: Uuid) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        DELETE FROM repair_leases
        WHERE resource = $1 AND holder = $2
    "#};
    let result = sqlx::query(query)
        .bind(resource)
        .bind(holder)
        .execute(exe)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Returns the lease row for `resource`, if any.
#[tracing::instrument(skip(exe), err)]
pub async fn get<'c, E>(exe: E, resource: &str) -> Result<Option<LeaseRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT resource, holder, acquired_at, expires_at
        FROM repair_leases
        WHERE resource = $1
    "#};
    sqlx::query_as(query).bind(resource).fetch_optional(exe).await
}

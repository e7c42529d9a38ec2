//! Error types for repair state database operations

use topology::NodeId;

use crate::db::ConnError;

/// Errors that can occur when interacting with the repair state database
///
/// This error type covers all repair state database operations including
/// connection management, migrations, and query execution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to establish connection to the repair state database
    ///
    /// This occurs during the initial connection phase when the database client
    /// fails to connect to PostgreSQL.
    ///
    /// Common causes:
    /// - Database server is not running or unreachable
    /// - Incorrect connection string or credentials
    /// - Network connectivity issues
    /// - Database server at capacity (too many connections)
    ///
    /// This error is considered retryable. See `is_connection_error()` method.
    #[error("Error connecting to repair state db: {0}")]
    Connection(sqlx::Error),

    /// Failed to run database migrations
    ///
    /// This occurs when the sqlx migration runner fails to apply database schema
    /// migrations during startup. Migration failures are usually fatal and
    /// require manual intervention.
    #[error("Error running migrations: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Database query execution failed
    ///
    /// This is the most common error variant and covers all database operation
    /// failures: lost connections (retryable), constraint violations,
    /// serialization failures from concurrent transactions (retryable),
    /// deadlocks (retryable), and permission problems.
    ///
    /// Use `is_retryable()` to determine if the error should be retried.
    /// Use `is_unique_violation()` to detect duplicate-key inserts.
    #[error("Error executing database query: {0}")]
    Database(#[source] sqlx::Error),

    /// Failed to transition a repair job's status
    ///
    /// This occurs when a compare-and-set status transition is rejected, either
    /// because the job row no longer exists or because another daemon already
    /// moved the job to a conflicting state.
    ///
    /// See [`JobStatusUpdateError`](crate::on_demand::JobStatusUpdateError) for
    /// the specific transition conflicts.
    #[error("Job status update error: {0}")]
    JobStatusUpdate(#[source] crate::on_demand::JobStatusUpdateError),

    /// The specified host ID is already in use by another daemon process
    ///
    /// Host-id exclusivity is enforced with a PostgreSQL advisory lock held
    /// for as long as the owning daemon's dedicated connection stays open.
    #[error("Host ID is already in use: {0}")]
    HostIdInUse(NodeId),
}

impl Error {
    /// Returns `true` if the error is likely to be a transient connection issue.
    ///
    /// This is used to determine if an operation should be retried.
    ///
    /// The following errors are considered retryable:
    /// - `Error::Connection`: the initial connection to the database failed.
    /// - `sqlx::Error::Io`: an I/O error, often a network issue or closed socket.
    /// - `sqlx::Error::Tls`: an error during the TLS handshake.
    /// - `sqlx::Error::PoolTimedOut`: the pool timed out waiting for a free connection.
    /// - `sqlx::Error::PoolClosed`: the pool was closed while an operation was pending.
    ///
    /// Other database errors, such as constraint violations, are not considered
    /// transient and will not be retried.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Returns `true` if the error is retryable.
    ///
    /// This includes both connection errors and transaction-specific errors that
    /// are commonly encountered with concurrent transactions and row-level
    /// locking: serialization failures and detected deadlocks. These are
    /// transient and safe to retry from the beginning of the transaction.
    pub fn is_retryable(&self) -> bool {
        if self.is_connection_error() {
            return true;
        }

        matches!(
            self,
            Error::Database(sqlx::Error::Database(err))
                if err.code().is_some_and(|code| matches!(
                    code.as_ref(),
                    pg_error_codes::SERIALIZATION_FAILURE | pg_error_codes::DEADLOCK_DETECTED
                ))
        )
    }

    /// Returns `true` if the error is a unique constraint violation.
    ///
    /// This occurs when an INSERT collides with an existing primary key, e.g.
    /// re-adding a `(host_id, job_id)` pair that already exists. Callers use
    /// this to distinguish "already created" from other database errors.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Error::Database(sqlx::Error::Database(err))
                if matches!(err.kind(), sqlx::error::ErrorKind::UniqueViolation)
        )
    }
}

impl From<ConnError> for Error {
    fn from(err: ConnError) -> Self {
        match err {
            ConnError::ConnectionError(err) => Error::Connection(err),
            ConnError::MigrationFailed(err) => Error::Migration(err),
        }
    }
}

/// PostgreSQL error codes for transaction-related errors.
///
/// For reference: <https://www.postgresql.org/docs/current/errcodes-appendix.html>
mod pg_error_codes {
    /// Serialization failure - occurs when two transactions conflict and one needs to be retried.
    pub const SERIALIZATION_FAILURE: &str = "40001";

    /// Deadlock detected - two or more transactions are waiting for each other to release locks.
    /// One transaction is aborted and should be retried.
    pub const DEADLOCK_DETECTED: &str = "40P01";
}

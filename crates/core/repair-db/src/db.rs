//! Database connection plumbing for the repair state DB.

mod conn;
mod exec;
mod txn;

pub use self::{
    conn::{ConnError, Connection, ConnPool},
    exec::Executor,
    txn::Transaction,
};

// Transaction Repository
// The read side the aggregator depends on. SQLite is the production store;
// anything that can answer "what changed since T" can stand in for it.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

use crate::db;

/// A transaction with its API and status already resolved to names
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub transaction_id: i64,
    pub amount: Decimal,
    pub api_name: String,
    pub status_name: String,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository timed out")]
    Timeout,

    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("transaction {transaction_id} references a missing {relation}")]
    DanglingReference {
        transaction_id: i64,
        relation: &'static str,
    },
}

impl RepositoryError {
    /// Infrastructure failures the next scrape may not hit again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted
                ) =>
            {
                Self::Timeout
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

pub trait TransactionRepository: Send + Sync {
    /// Transactions whose last modification is at or after `since`.
    /// No upper bound: rows stamped after "now" are included.
    fn list_transactions_modified_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, RepositoryError>;
}

/// SQLite-backed repository sharing one connection across requests
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

impl TransactionRepository for SqliteRepository {
    fn list_transactions_modified_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("connection lock poisoned".to_string()))?;

        let rows = db::query_window(&conn, since)?;

        rows.into_iter()
            .map(|row| {
                let api_name = row.api_name.ok_or(RepositoryError::DanglingReference {
                    transaction_id: row.transaction_id,
                    relation: "api",
                })?;
                let status_name = row.status_name.ok_or(RepositoryError::DanglingReference {
                    transaction_id: row.transaction_id,
                    relation: "status",
                })?;

                Ok(TransactionRecord {
                    transaction_id: row.transaction_id,
                    amount: row.amount,
                    api_name,
                    status_name,
                    modified_at: row.modified_at,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(|e| warn!(error = %e, "window query returned an unusable row"))
    }
}

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Longest API name the schema accepts
pub const API_NAME_MAX: usize = 15;
/// Longest status name the schema accepts
pub const STATUS_NAME_MAX: usize = 10;
/// Longest free-text description for APIs and statuses
pub const DESCRIPTION_MAX: usize = 100;

// SQLite has no native microsecond clock; julianday('now') carries millisecond
// precision which we scale to unix epoch microseconds.
const NOW_MICROS_SQL: &str = "CAST(ROUND((julianday('now') - 2440587.5) * 86400000.0) AS INTEGER) * 1000";

/// An upstream API whose calls produce transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Api {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Arbitrary structured parameters, stored as JSON text
    pub params: serde_json::Value,
}

/// Processing state of a transaction ("Pending", "Failed", ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Row of the windowed join: names are `None` when a reference dangles
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRow {
    pub transaction_id: i64,
    pub amount: Decimal,
    pub api_name: Option<String>,
    pub status_name: Option<String>,
    pub modified_at: DateTime<Utc>,
}

/// Open (or create) the database file and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;

    // WAL lets scrapes read while the seeder writes
    conn.pragma_update(None, "journal_mode", "WAL")?;

    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Cascading deletes only fire with enforcement switched on
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS apis (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE CHECK (length(name) <= {API_NAME_MAX}),
                description TEXT NOT NULL CHECK (length(description) <= {DESCRIPTION_MAX}),
                params TEXT NOT NULL DEFAULT '{{}}'
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS transaction_statuses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE CHECK (length(name) <= {STATUS_NAME_MAX}),
                description TEXT NOT NULL CHECK (length(description) <= {DESCRIPTION_MAX})
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                amount TEXT NOT NULL,
                api_id INTEGER NOT NULL REFERENCES apis(id) ON DELETE CASCADE,
                status_id INTEGER NOT NULL REFERENCES transaction_statuses(id) ON DELETE CASCADE,
                time_modified INTEGER NOT NULL DEFAULT ({NOW_MICROS_SQL})
            )"
        ),
        [],
    )?;

    // The store owns the modification timestamp, like an auto-now column
    conn.execute(
        &format!(
            "CREATE TRIGGER IF NOT EXISTS trg_transactions_touch
             AFTER UPDATE OF amount, api_id, status_id ON transactions
             FOR EACH ROW
             BEGIN
                 UPDATE transactions SET time_modified = {NOW_MICROS_SQL} WHERE id = NEW.id;
             END"
        ),
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_time_modified ON transactions(time_modified)",
        [],
    )?;

    Ok(())
}

/// Fetch the API called `name`, creating it if it does not exist yet.
pub fn get_or_create_api(
    conn: &Connection,
    name: &str,
    description: &str,
    params: &serde_json::Value,
) -> Result<Api> {
    let params_json = serde_json::to_string(params)?;

    conn.execute(
        "INSERT INTO apis (name, description, params) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO NOTHING",
        params![name, description, params_json],
    )
    .with_context(|| format!("Failed to create API '{}'", name))?;

    let (id, description, params_json): (i64, String, String) = conn.query_row(
        "SELECT id, description, params FROM apis WHERE name = ?1",
        [name],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(Api {
        id,
        name: name.to_string(),
        description,
        params: serde_json::from_str(&params_json)
            .with_context(|| format!("API '{}' has malformed params", name))?,
    })
}

/// Fetch the status called `name`, creating it if needed. The description is
/// overwritten with the supplied one either way.
pub fn get_or_create_status(
    conn: &Connection,
    name: &str,
    description: &str,
) -> Result<TransactionStatus> {
    conn.execute(
        "INSERT INTO transaction_statuses (name, description) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET description = excluded.description",
        params![name, description],
    )
    .with_context(|| format!("Failed to upsert status '{}'", name))?;

    let id: i64 = conn.query_row(
        "SELECT id FROM transaction_statuses WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;

    Ok(TransactionStatus {
        id,
        name: name.to_string(),
        description: description.to_string(),
    })
}

/// Reject amounts the reference schema cannot hold: at most 3 integer digits
/// and 2 fractional digits.
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount.normalize().scale() > 2 {
        bail!("amount {} has more than 2 fractional digits", amount);
    }
    if amount.abs() >= Decimal::from(1000) {
        bail!("amount {} has more than 3 integer digits", amount);
    }
    Ok(())
}

/// Insert a transaction, letting the store stamp its modification time.
pub fn insert_transaction(
    conn: &Connection,
    api_id: i64,
    status_id: i64,
    amount: Decimal,
) -> Result<i64> {
    validate_amount(amount)?;

    conn.execute(
        "INSERT INTO transactions (amount, api_id, status_id) VALUES (?1, ?2, ?3)",
        params![amount.to_string(), api_id, status_id],
    )
    .context("Failed to insert transaction")?;

    Ok(conn.last_insert_rowid())
}

/// Insert a transaction with an explicit modification time (backfills, tests).
pub fn insert_transaction_at(
    conn: &Connection,
    api_id: i64,
    status_id: i64,
    amount: Decimal,
    modified_at: DateTime<Utc>,
) -> Result<i64> {
    validate_amount(amount)?;

    conn.execute(
        "INSERT INTO transactions (amount, api_id, status_id, time_modified)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            amount.to_string(),
            api_id,
            status_id,
            modified_at.timestamp_micros()
        ],
    )
    .context("Failed to insert transaction")?;

    Ok(conn.last_insert_rowid())
}

/// Move a transaction to another status. The touch trigger refreshes
/// `time_modified`.
pub fn update_transaction_status(conn: &Connection, transaction_id: i64, status_id: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE transactions SET status_id = ?1 WHERE id = ?2",
        params![status_id, transaction_id],
    )?;

    if changed == 0 {
        bail!("transaction {} does not exist", transaction_id);
    }
    Ok(())
}

/// Modification time of a single transaction, if it exists
pub fn transaction_modified_at(conn: &Connection, transaction_id: i64) -> Result<Option<DateTime<Utc>>> {
    let micros: Option<i64> = conn
        .query_row(
            "SELECT time_modified FROM transactions WHERE id = ?1",
            [transaction_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(micros.and_then(DateTime::<Utc>::from_timestamp_micros))
}

pub fn count_transactions(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

    Ok(count)
}

/// Every transaction modified at or after `since`, with API and status names
/// resolved in the same query.
pub fn query_window(conn: &Connection, since: DateTime<Utc>) -> rusqlite::Result<Vec<WindowRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.id, t.amount, a.name, s.name, t.time_modified
         FROM transactions t
         LEFT JOIN apis a ON a.id = t.api_id
         LEFT JOIN transaction_statuses s ON s.id = t.status_id
         WHERE t.time_modified >= ?1",
    )?;

    let rows = stmt
        .query_map([since.timestamp_micros()], |row| {
            let amount_text: String = row.get(1)?;
            let micros: i64 = row.get(4)?;

            Ok(WindowRow {
                transaction_id: row.get(0)?,
                amount: Decimal::from_str(&amount_text)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
                api_name: row.get(2)?,
                status_name: row.get(3)?,
                modified_at: DateTime::<Utc>::from_timestamp_micros(micros)
                    .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, micros))?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

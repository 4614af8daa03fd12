// Seeder
// Fills the store with synthetic transactions for demos and local scraping.

use anyhow::{Context, Result};
use rand::seq::IndexedRandom;
use rand::Rng;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::{get_or_create_api, get_or_create_status, insert_transaction, Api};

pub const STATUSES: [&str; 5] = ["TimedOut", "Pending", "Processing", "Processed", "Failed"];
pub const APIS: [&str; 2] = ["Mpesa Express", "Mpesa B2C"];

/// Default number of transactions per seeding run
pub const DEFAULT_COUNT: usize = 50;

// Amounts in cents: 111.00 ..= 999.99
const MIN_CENTS: i64 = 11_100;
const MAX_CENTS: i64 = 99_999;

/// Make sure the demo APIs exist, returning them in [`APIS`] order.
pub fn ensure_apis(conn: &Connection) -> Result<Vec<Api>> {
    APIS.iter()
        .map(|name| get_or_create_api(conn, name, name, &serde_json::json!({})))
        .collect()
}

/// Insert `count` random transactions in one database transaction.
pub fn populate<R: Rng + ?Sized>(conn: &Connection, count: usize, rng: &mut R) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let apis = ensure_apis(&tx)?;

    for _ in 0..count {
        let api = apis.choose(rng).context("no APIs to choose from")?;
        let status_name = STATUSES.choose(rng).context("no statuses to choose from")?;
        // populate mirrors each status name into its description
        let status = get_or_create_status(&tx, status_name, status_name)?;
        let amount = Decimal::new(rng.random_range(MIN_CENTS..=MAX_CENTS), 2);

        insert_transaction(&tx, api.id, status.id, amount)?;
    }

    tx.commit().context("Failed to commit seeded transactions")?;
    info!(count, "seeded transactions");

    Ok(count)
}

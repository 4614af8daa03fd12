// API Metrics - Core Library
// Transaction volume per API and status, exposed as a Prometheus scrape target

pub mod db;
pub mod repository;
pub mod aggregator;
pub mod exporter;
pub mod config;
pub mod seed;
#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use db::{
    Api, TransactionStatus,
    open_database, setup_database, get_or_create_api, get_or_create_status,
    insert_transaction, insert_transaction_at, update_transaction_status, count_transactions,
};
pub use repository::{
    TransactionRepository, TransactionRecord, RepositoryError, SqliteRepository,
};
pub use aggregator::{
    Aggregates, AggregateError, SampleKey, compute, compute_now, default_window,
};
pub use exporter::{
    ExportError, render, render_api_transactions, CONTENT_TYPE, METRIC_NAME, METRIC_HELP, LABEL_NAMES,
};
pub use config::{Config, ConfigError};
#[cfg(feature = "server")]
pub use server::{AppState, ScrapeError, router};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

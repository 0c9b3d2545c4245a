use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{EquityError, Result};

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    setup_database(&conn).context("Failed to set up database schema")?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "journal mode set");
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Shares configuration (single row, id = 1)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS shares_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            authorized_shares INTEGER NOT NULL CHECK (authorized_shares > 0),
            issued_shares INTEGER NOT NULL DEFAULT 0 CHECK (issued_shares >= 0),
            par_value REAL NOT NULL DEFAULT 1.0,
            class_type TEXT NOT NULL DEFAULT 'common',
            status TEXT NOT NULL DEFAULT 'active',
            updated_at TEXT NOT NULL,
            CHECK (issued_shares <= authorized_shares)
        )",
        [],
    )?;

    // ==========================================================================
    // Shareholders and their holdings
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS shareholders (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            holder_type TEXT NOT NULL,
            email TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS shareholdings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            shareholder_id TEXT NOT NULL REFERENCES shareholders(id),
            shares_owned INTEGER NOT NULL CHECK (shares_owned >= 0),
            equity_type TEXT NOT NULL,
            investment_amount REAL NOT NULL DEFAULT 0,
            vesting_start_date TEXT,
            vesting_end_date TEXT,
            vesting_percentage REAL NOT NULL DEFAULT 100
                CHECK (vesting_percentage >= 0 AND vesting_percentage <= 100),
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Append-only records: share transactions and valuation snapshots
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS share_transactions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            transaction_type TEXT NOT NULL,
            from_shareholder_id TEXT,
            to_shareholder_id TEXT,
            shares_amount INTEGER NOT NULL CHECK (shares_amount > 0),
            price_per_share REAL NOT NULL,
            total_value REAL NOT NULL,
            reason TEXT,
            created_at TEXT NOT NULL,
            previous_hash TEXT NOT NULL,
            entry_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS valuation_snapshots (
            id TEXT PRIMARY KEY,
            pre_money_valuation REAL NOT NULL,
            investment_amount REAL NOT NULL,
            post_money_valuation REAL NOT NULL,
            issued_shares_before INTEGER NOT NULL,
            share_price REAL NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    for table in ["share_transactions", "valuation_snapshots"] {
        conn.execute_batch(&format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_no_update
             BEFORE UPDATE ON {table}
             BEGIN SELECT RAISE(ABORT, '{table} is append-only'); END;
             CREATE TRIGGER IF NOT EXISTS {table}_no_delete
             BEFORE DELETE ON {table}
             BEGIN SELECT RAISE(ABORT, '{table} is append-only'); END;"
        ))?;
    }

    // ==========================================================================
    // Ledgers owned by other modules (read here for valuation only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            acquisition_cost REAL NOT NULL DEFAULT 0,
            accumulated_depreciation REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS liabilities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            outstanding_amount REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS intellectual_property (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            valuation_estimate REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS infrastructure (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            replacement_cost REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active'
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_holdings_holder ON shareholdings(shareholder_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_shareholders_type ON shareholders(holder_type)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_share_tx_from ON share_transactions(from_shareholder_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_share_tx_to ON share_transactions(to_shareholder_id)",
        [],
    )?;

    Ok(())
}

/// Run `work` inside one IMMEDIATE transaction.
///
/// Commits when `work` returns `Ok`. On `Err` the transaction is dropped,
/// and `rusqlite::Transaction` rolls back on drop, so no partial writes
/// survive any failure path (including panics).
pub fn with_transaction<T, F>(conn: &mut Connection, work: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    match work(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if !e.is_client_error() {
                warn!(error = %e, "rolling back transaction");
            }
            // Dropping tx rolls back
            Err(e)
        }
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EquityError::Internal(format!("bad timestamp '{}': {}", value, e)))
}

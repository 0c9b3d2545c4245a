// 📜 Share Transaction Log
//
// Append-only audit trail of issuance, transfer and buyback operations.
// The table rejects UPDATE and DELETE (triggers in db.rs), and every entry
// carries SHA-256(previous_hash | fields) so tampering with stored rows is
// detectable by `verify_ledger`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::db::parse_timestamp;
use crate::error::{EquityError, Result};

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Issuance,
    Transfer,
    Buyback,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Issuance => "issuance",
            TransactionType::Transfer => "transfer",
            TransactionType::Buyback => "buyback",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "issuance" => Ok(TransactionType::Issuance),
            "transfer" => Ok(TransactionType::Transfer),
            "buyback" => Ok(TransactionType::Buyback),
            other => Err(EquityError::Internal(format!("unknown transaction type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareTransaction {
    pub id: String,
    pub transaction_type: TransactionType,
    pub from_shareholder_id: Option<String>,
    pub to_shareholder_id: Option<String>,
    pub shares_amount: i64,
    pub price_per_share: f64,
    /// shares_amount × price_per_share (repurchase value for buybacks)
    pub total_value: f64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub previous_hash: String,
    pub entry_hash: String,
}

impl ShareTransaction {
    fn new(entry: NewLedgerEntry, previous_hash: String) -> Self {
        let mut tx = ShareTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            transaction_type: entry.transaction_type,
            from_shareholder_id: entry.from_shareholder_id,
            to_shareholder_id: entry.to_shareholder_id,
            shares_amount: entry.shares_amount,
            price_per_share: entry.price_per_share,
            total_value: entry.shares_amount as f64 * entry.price_per_share,
            reason: entry.reason,
            created_at: Utc::now(),
            previous_hash,
            entry_hash: String::new(),
        };
        tx.entry_hash = tx.compute_hash();
        tx
    }

    /// SHA-256 over the previous hash and every stored field
    pub fn compute_hash(&self) -> String {
        let content = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.previous_hash,
            self.id,
            self.transaction_type.as_str(),
            self.from_shareholder_id.as_deref().unwrap_or(""),
            self.to_shareholder_id.as_deref().unwrap_or(""),
            self.shares_amount,
            self.price_per_share,
            self.total_value,
            self.reason.as_deref().unwrap_or(""),
            self.created_at.to_rfc3339(),
        );

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Fields supplied by the operation; id, timestamps and hashes are assigned here
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub transaction_type: TransactionType,
    pub from_shareholder_id: Option<String>,
    pub to_shareholder_id: Option<String>,
    pub shares_amount: i64,
    pub price_per_share: f64,
    pub reason: Option<String>,
}

fn last_hash(conn: &Connection) -> Result<String> {
    let hash: Option<String> = conn
        .query_row(
            "SELECT entry_hash FROM share_transactions ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hash.unwrap_or_else(|| GENESIS_HASH.to_string()))
}

/// Append one entry. Call inside the operation's unit of work.
pub fn append_transaction(conn: &Connection, entry: NewLedgerEntry) -> Result<ShareTransaction> {
    let tx = ShareTransaction::new(entry, last_hash(conn)?);

    conn.execute(
        "INSERT INTO share_transactions (
            id, transaction_type, from_shareholder_id, to_shareholder_id,
            shares_amount, price_per_share, total_value, reason, created_at,
            previous_hash, entry_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            tx.id,
            tx.transaction_type.as_str(),
            tx.from_shareholder_id,
            tx.to_shareholder_id,
            tx.shares_amount,
            tx.price_per_share,
            tx.total_value,
            tx.reason,
            tx.created_at.to_rfc3339(),
            tx.previous_hash,
            tx.entry_hash,
        ],
    )?;

    Ok(tx)
}

struct LedgerRow {
    id: String,
    transaction_type: String,
    from_shareholder_id: Option<String>,
    to_shareholder_id: Option<String>,
    shares_amount: i64,
    price_per_share: f64,
    total_value: f64,
    reason: Option<String>,
    created_at: String,
    previous_hash: String,
    entry_hash: String,
}

fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerRow> {
    Ok(LedgerRow {
        id: row.get(0)?,
        transaction_type: row.get(1)?,
        from_shareholder_id: row.get(2)?,
        to_shareholder_id: row.get(3)?,
        shares_amount: row.get(4)?,
        price_per_share: row.get(5)?,
        total_value: row.get(6)?,
        reason: row.get(7)?,
        created_at: row.get(8)?,
        previous_hash: row.get(9)?,
        entry_hash: row.get(10)?,
    })
}

impl TryFrom<LedgerRow> for ShareTransaction {
    type Error = EquityError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(ShareTransaction {
            transaction_type: TransactionType::parse(&row.transaction_type)?,
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            from_shareholder_id: row.from_shareholder_id,
            to_shareholder_id: row.to_shareholder_id,
            shares_amount: row.shares_amount,
            price_per_share: row.price_per_share,
            total_value: row.total_value,
            reason: row.reason,
            previous_hash: row.previous_hash,
            entry_hash: row.entry_hash,
        })
    }
}

const LEDGER_SELECT: &str = "SELECT id, transaction_type, from_shareholder_id, to_shareholder_id,
        shares_amount, price_per_share, total_value, reason, created_at,
        previous_hash, entry_hash
     FROM share_transactions";

/// Most recent entries first
pub fn list_transactions(conn: &Connection, limit: Option<u32>) -> Result<Vec<ShareTransaction>> {
    let sql = format!("{LEDGER_SELECT} ORDER BY seq DESC LIMIT ?1");
    let limit = limit.map(i64::from).unwrap_or(-1);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit], ledger_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(ShareTransaction::try_from).collect()
}

pub fn transactions_for_shareholder(conn: &Connection, shareholder_id: &str) -> Result<Vec<ShareTransaction>> {
    let sql = format!(
        "{LEDGER_SELECT} WHERE from_shareholder_id = ?1 OR to_shareholder_id = ?1 ORDER BY seq DESC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([shareholder_id], ledger_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(ShareTransaction::try_from).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerVerification {
    pub entries_checked: usize,
    pub valid: bool,
    /// Id of the first entry whose hash or link does not match
    pub first_broken_entry: Option<String>,
}

/// Walk the chain from the oldest entry and recompute every hash
pub fn verify_ledger(conn: &Connection) -> Result<LedgerVerification> {
    let sql = format!("{LEDGER_SELECT} ORDER BY seq ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], ledger_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut expected_previous = GENESIS_HASH.to_string();
    let mut checked = 0;

    for row in rows {
        let entry = ShareTransaction::try_from(row)?;
        checked += 1;

        if entry.previous_hash != expected_previous || entry.compute_hash() != entry.entry_hash {
            warn!(entry_id = %entry.id, "share ledger chain broken");
            return Ok(LedgerVerification {
                entries_checked: checked,
                valid: false,
                first_broken_entry: Some(entry.id),
            });
        }

        expected_previous = entry.entry_hash;
    }

    Ok(LedgerVerification {
        entries_checked: checked,
        valid: true,
        first_broken_entry: None,
    })
}

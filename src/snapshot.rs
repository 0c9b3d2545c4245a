// 📸 Valuation snapshots (funding rounds)
//
// Immutable once written: the table rejects UPDATE and DELETE.
//   post_money = pre_money + investment
//   share_price = pre_money / issued_shares_before

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::parse_timestamp;
use crate::error::{EquityError, Result};
use crate::shares::get_configuration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationSnapshot {
    pub id: String,
    pub pre_money_valuation: f64,
    pub investment_amount: f64,
    pub post_money_valuation: f64,
    pub issued_shares_before: i64,
    pub share_price: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewValuation {
    pub pre_money_valuation: f64,
    #[serde(default)]
    pub investment_amount: f64,
}

impl ValuationSnapshot {
    /// Derive the snapshot fields. Share price is 0 when nothing is issued yet.
    pub fn derive(input: &NewValuation, issued_shares_before: i64) -> Result<Self> {
        if !input.pre_money_valuation.is_finite() || input.pre_money_valuation <= 0.0 {
            return Err(EquityError::validation(format!(
                "pre_money_valuation must be positive, got {}",
                input.pre_money_valuation
            )));
        }
        if !input.investment_amount.is_finite() || input.investment_amount < 0.0 {
            return Err(EquityError::validation(format!(
                "investment_amount must be non-negative, got {}",
                input.investment_amount
            )));
        }

        let share_price = if issued_shares_before > 0 {
            input.pre_money_valuation / issued_shares_before as f64
        } else {
            0.0
        };

        Ok(ValuationSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            pre_money_valuation: input.pre_money_valuation,
            investment_amount: input.investment_amount,
            post_money_valuation: input.pre_money_valuation + input.investment_amount,
            issued_shares_before,
            share_price,
            created_at: Utc::now(),
        })
    }
}

pub fn record_valuation(conn: &Connection, input: &NewValuation) -> Result<ValuationSnapshot> {
    let config = get_configuration(conn)?;
    let snapshot = ValuationSnapshot::derive(input, config.issued_shares)?;

    conn.execute(
        "INSERT INTO valuation_snapshots (
            id, pre_money_valuation, investment_amount, post_money_valuation,
            issued_shares_before, share_price, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            snapshot.id,
            snapshot.pre_money_valuation,
            snapshot.investment_amount,
            snapshot.post_money_valuation,
            snapshot.issued_shares_before,
            snapshot.share_price,
            snapshot.created_at.to_rfc3339(),
        ],
    )?;

    info!(
        post_money = snapshot.post_money_valuation,
        share_price = snapshot.share_price,
        "valuation snapshot recorded"
    );

    Ok(snapshot)
}

struct SnapshotRow {
    id: String,
    pre_money_valuation: f64,
    investment_amount: f64,
    post_money_valuation: f64,
    issued_shares_before: i64,
    share_price: f64,
    created_at: String,
}

impl TryFrom<SnapshotRow> for ValuationSnapshot {
    type Error = EquityError;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        Ok(ValuationSnapshot {
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            pre_money_valuation: row.pre_money_valuation,
            investment_amount: row.investment_amount,
            post_money_valuation: row.post_money_valuation,
            issued_shares_before: row.issued_shares_before,
            share_price: row.share_price,
        })
    }
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        id: row.get(0)?,
        pre_money_valuation: row.get(1)?,
        investment_amount: row.get(2)?,
        post_money_valuation: row.get(3)?,
        issued_shares_before: row.get(4)?,
        share_price: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Newest first
pub fn list_valuations(conn: &Connection) -> Result<Vec<ValuationSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT id, pre_money_valuation, investment_amount, post_money_valuation,
                issued_shares_before, share_price, created_at
         FROM valuation_snapshots
         ORDER BY created_at DESC",
    )?;

    let rows = stmt
        .query_map([], snapshot_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(ValuationSnapshot::try_from).collect()
}

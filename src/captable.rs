// 📊 Cap Table Aggregator
//
// One row per active holding, joined to its shareholder and to the shares
// configuration. Ownership is measured against the authorized ceiling.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::io::Write;

use crate::error::{EquityError, Result};
use crate::holdings::{active_holdings_for, Shareholding};
use crate::shareholders::{get_shareholder, HolderType, Shareholder};
use crate::shares::{allocated_shares, get_configuration};
use crate::valuation::{compute_strategic_value, price_per_share, ValuationCache};
use crate::vesting::{parse_date, vested_shares, EquityType, VestingTerms};

#[derive(Debug, Clone, Serialize)]
pub struct CapTableRow {
    pub holding_id: i64,
    pub shareholder_id: String,
    pub name: String,
    pub holder_type: HolderType,
    pub equity_type: EquityType,
    pub shares_owned: i64,
    pub ownership_percentage: f64,
    pub vested_shares: i64,
    pub unvested_shares: i64,
    pub vesting_start_date: Option<NaiveDate>,
    pub vesting_end_date: Option<NaiveDate>,
    pub vesting_percentage: f64,
    pub investment_amount: f64,
    pub share_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapTableSummary {
    pub total_shareholders: usize,
    pub total_shares: i64,
    pub total_vested: i64,
    pub total_unvested: i64,
    pub total_investment: f64,
    pub total_value: f64,
    pub total_ownership_percentage: f64,
    pub authorized_shares: i64,
    pub issued_shares: i64,
    pub unallocated_shares: i64,
    pub price_per_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapTable {
    pub shareholders: Vec<CapTableRow>,
    pub summary: CapTableSummary,
}

/// Build the cap table as of `today`, optionally for one holder type
pub fn get_cap_table(
    conn: &Connection,
    cache: &dyn ValuationCache,
    holder_type: Option<HolderType>,
    today: NaiveDate,
) -> Result<CapTable> {
    let config = get_configuration(conn)?;
    let valuation = compute_strategic_value(conn, cache)?;
    let price = price_per_share(valuation.strategic_value, config.authorized_shares);

    let mut stmt = conn.prepare(
        "SELECT h.id, h.shareholder_id, s.name, s.holder_type, h.equity_type,
                h.shares_owned, h.investment_amount,
                h.vesting_start_date, h.vesting_end_date, h.vesting_percentage
         FROM shareholdings h
         JOIN shareholders s ON s.id = h.shareholder_id
         WHERE h.status = 'active' AND s.status = 'active'
           AND (?1 IS NULL OR s.holder_type = ?1)
         ORDER BY h.shares_owned DESC, s.name, h.id",
    )?;

    type RawRow = (i64, String, String, String, String, i64, f64, Option<String>, Option<String>, f64);
    let raw: Vec<RawRow> = stmt
        .query_map([holder_type.map(|t| t.as_str())], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(raw.len());
    for (holding_id, shareholder_id, name, holder, equity, shares, investment, start, end, pct) in raw {
        let equity_type = EquityType::parse(&equity)?;
        let terms = VestingTerms {
            start_date: parse_date(start.as_deref()),
            end_date: parse_date(end.as_deref()),
            percentage: pct,
        };
        let vested = vested_shares(shares, equity_type, &terms, today);

        rows.push(CapTableRow {
            holding_id,
            shareholder_id,
            name,
            holder_type: HolderType::parse(&holder)?,
            equity_type,
            shares_owned: shares,
            ownership_percentage: ownership_percentage(shares, config.authorized_shares),
            vested_shares: vested,
            unvested_shares: shares - vested,
            vesting_start_date: terms.start_date,
            vesting_end_date: terms.end_date,
            vesting_percentage: pct,
            investment_amount: investment,
            share_value: shares as f64 * price,
        });
    }

    let mut holders: Vec<&str> = rows.iter().map(|r| r.shareholder_id.as_str()).collect();
    holders.sort_unstable();
    holders.dedup();

    let total_shares: i64 = rows.iter().map(|r| r.shares_owned).sum();
    let total_vested: i64 = rows.iter().map(|r| r.vested_shares).sum();

    let summary = CapTableSummary {
        total_shareholders: holders.len(),
        total_shares,
        total_vested,
        total_unvested: total_shares - total_vested,
        total_investment: rows.iter().map(|r| r.investment_amount).sum(),
        total_value: rows.iter().map(|r| r.share_value).sum(),
        total_ownership_percentage: ownership_percentage(total_shares, config.authorized_shares),
        authorized_shares: config.authorized_shares,
        issued_shares: config.issued_shares,
        unallocated_shares: config.unallocated_shares(allocated_shares(conn)?),
        price_per_share: price,
    };

    Ok(CapTable {
        shareholders: rows,
        summary,
    })
}

pub fn ownership_percentage(shares: i64, authorized_shares: i64) -> f64 {
    if authorized_shares <= 0 {
        return 0.0;
    }
    shares as f64 / authorized_shares as f64 * 100.0
}

/// Vested shares of a single holding as of `today`
pub fn holding_vested_shares(holding: &Shareholding, today: NaiveDate) -> i64 {
    vested_shares(holding.shares_owned, holding.equity_type, &holding.vesting_terms(), today)
}

// ============================================================================
// PER-HOLDER POSITION
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HoldingPosition {
    #[serde(flatten)]
    pub holding: Shareholding,
    pub vested_shares: i64,
    pub unvested_shares: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareholderPosition {
    pub shareholder: Shareholder,
    pub holdings: Vec<HoldingPosition>,
    pub total_shares: i64,
    pub vested_shares: i64,
    pub unvested_shares: i64,
    pub ownership_percentage: f64,
}

/// One holder's active holdings with vesting as of `today`
pub fn shareholder_position(conn: &Connection, shareholder_id: &str, today: NaiveDate) -> Result<ShareholderPosition> {
    let shareholder = get_shareholder(conn, shareholder_id)?;
    let config = get_configuration(conn)?;

    let holdings: Vec<HoldingPosition> = active_holdings_for(conn, shareholder_id)?
        .into_iter()
        .map(|holding| {
            let vested = holding_vested_shares(&holding, today);
            HoldingPosition {
                unvested_shares: holding.shares_owned - vested,
                vested_shares: vested,
                holding,
            }
        })
        .collect();

    let total_shares: i64 = holdings.iter().map(|h| h.holding.shares_owned).sum();
    let vested: i64 = holdings.iter().map(|h| h.vested_shares).sum();

    Ok(ShareholderPosition {
        shareholder,
        holdings,
        total_shares,
        vested_shares: vested,
        unvested_shares: total_shares - vested,
        ownership_percentage: ownership_percentage(total_shares, config.authorized_shares),
    })
}

// ============================================================================
// CSV EXPORT
// ============================================================================

#[derive(Serialize)]
struct CsvRow<'a> {
    shareholder_id: &'a str,
    name: &'a str,
    holder_type: &'a str,
    equity_type: &'a str,
    shares_owned: i64,
    ownership_percentage: String,
    vested_shares: i64,
    unvested_shares: i64,
    investment_amount: String,
    share_value: String,
}

pub fn write_cap_table_csv<W: Write>(cap_table: &CapTable, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    for row in &cap_table.shareholders {
        wtr.serialize(CsvRow {
            shareholder_id: &row.shareholder_id,
            name: &row.name,
            holder_type: row.holder_type.as_str(),
            equity_type: row.equity_type.as_str(),
            shares_owned: row.shares_owned,
            ownership_percentage: format!("{:.4}", row.ownership_percentage),
            vested_shares: row.vested_shares,
            unvested_shares: row.unvested_shares,
            investment_amount: format!("{:.2}", row.investment_amount),
            share_value: format!("{:.2}", row.share_value),
        })
        .map_err(|e| EquityError::Internal(format!("CSV write failed: {}", e)))?;
    }

    wtr.flush()
        .map_err(|e| EquityError::Internal(format!("CSV flush failed: {}", e)))?;
    Ok(())
}

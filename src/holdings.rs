// Shareholdings: the shares each holder owns, one row per purchase lot or grant
//
// Invariant: Σ shares_owned over active rows <= shares_config.issued_shares.
// Rows that reach zero shares are marked inactive, never deleted.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::now_rfc3339;
use crate::error::{EquityError, Result};
use crate::vesting::{parse_date, EquityType, VestingTerms, DATE_FORMAT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shareholding {
    pub id: i64,
    pub shareholder_id: String,
    pub shares_owned: i64,
    pub equity_type: EquityType,
    pub investment_amount: f64,
    pub vesting_start_date: Option<NaiveDate>,
    pub vesting_end_date: Option<NaiveDate>,
    pub vesting_percentage: f64,
    pub status: String,
}

impl Shareholding {
    pub fn vesting_terms(&self) -> VestingTerms {
        VestingTerms {
            start_date: self.vesting_start_date,
            end_date: self.vesting_end_date,
            percentage: self.vesting_percentage,
        }
    }
}

struct HoldingRow {
    id: i64,
    shareholder_id: String,
    shares_owned: i64,
    equity_type: String,
    investment_amount: f64,
    vesting_start_date: Option<String>,
    vesting_end_date: Option<String>,
    vesting_percentage: f64,
    status: String,
}

impl TryFrom<HoldingRow> for Shareholding {
    type Error = EquityError;

    fn try_from(row: HoldingRow) -> Result<Self> {
        Ok(Shareholding {
            equity_type: EquityType::parse(&row.equity_type)?,
            vesting_start_date: parse_date(row.vesting_start_date.as_deref()),
            vesting_end_date: parse_date(row.vesting_end_date.as_deref()),
            id: row.id,
            shareholder_id: row.shareholder_id,
            shares_owned: row.shares_owned,
            investment_amount: row.investment_amount,
            vesting_percentage: row.vesting_percentage,
            status: row.status,
        })
    }
}

const HOLDING_COLUMNS: &str = "id, shareholder_id, shares_owned, equity_type, investment_amount,
    vesting_start_date, vesting_end_date, vesting_percentage, status";

fn holding_from_row(row: &Row<'_>) -> rusqlite::Result<HoldingRow> {
    Ok(HoldingRow {
        id: row.get(0)?,
        shareholder_id: row.get(1)?,
        shares_owned: row.get(2)?,
        equity_type: row.get(3)?,
        investment_amount: row.get(4)?,
        vesting_start_date: row.get(5)?,
        vesting_end_date: row.get(6)?,
        vesting_percentage: row.get(7)?,
        status: row.get(8)?,
    })
}

/// Active holdings of one shareholder in debit order: purchased lots first,
/// then grants oldest first.
pub fn active_holdings_for(conn: &Connection, shareholder_id: &str) -> Result<Vec<Shareholding>> {
    let sql = format!(
        "SELECT {HOLDING_COLUMNS} FROM shareholdings
         WHERE shareholder_id = ?1 AND status = 'active'
         ORDER BY CASE equity_type WHEN 'PURCHASED' THEN 0 ELSE 1 END, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([shareholder_id], holding_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(Shareholding::try_from).collect()
}

pub fn active_shares_for(conn: &Connection, shareholder_id: &str) -> Result<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(shares_owned), 0) FROM shareholdings
         WHERE shareholder_id = ?1 AND status = 'active'",
        [shareholder_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Add a new lot or grant row
pub fn insert_holding(
    conn: &Connection,
    shareholder_id: &str,
    shares: i64,
    equity_type: EquityType,
    investment_amount: f64,
    terms: &VestingTerms,
) -> Result<i64> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO shareholdings (
            shareholder_id, shares_owned, equity_type, investment_amount,
            vesting_start_date, vesting_end_date, vesting_percentage,
            status, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, ?8)",
        params![
            shareholder_id,
            shares,
            equity_type.as_str(),
            investment_amount,
            terms.start_date.map(|d| d.format(DATE_FORMAT).to_string()),
            terms.end_date.map(|d| d.format(DATE_FORMAT).to_string()),
            terms.percentage,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Merge shares into the holder's active purchased lot, creating it if needed
pub fn credit_purchased(
    conn: &Connection,
    shareholder_id: &str,
    shares: i64,
    investment_amount: f64,
) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM shareholdings
             WHERE shareholder_id = ?1 AND equity_type = 'PURCHASED' AND status = 'active'
             ORDER BY id LIMIT 1",
            [shareholder_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE shareholdings
                 SET shares_owned = shares_owned + ?1,
                     investment_amount = investment_amount + ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![shares, investment_amount, now_rfc3339(), id],
            )?;
            Ok(id)
        }
        None => insert_holding(
            conn,
            shareholder_id,
            shares,
            EquityType::Purchased,
            investment_amount,
            &VestingTerms { start_date: None, end_date: None, percentage: 100.0 },
        ),
    }
}

/// Portion of one holding removed by a debit, with the cost basis and
/// vesting terms that travel with it
#[derive(Debug, Clone, PartialEq)]
pub struct DebitedLot {
    pub holding_id: i64,
    pub equity_type: EquityType,
    pub shares: i64,
    pub investment_amount: f64,
    pub terms: VestingTerms,
}

/// Remove `shares` from the holder's active holdings in debit order.
///
/// Each touched holding gives up a pro rata share of its investment amount;
/// an emptied holding gives up all of it. Fails with a validation error (and
/// writes nothing) when the holder owns fewer than `shares`.
pub fn debit_shares(conn: &Connection, shareholder_id: &str, shares: i64) -> Result<Vec<DebitedLot>> {
    let holdings = active_holdings_for(conn, shareholder_id)?;
    let available: i64 = holdings.iter().map(|h| h.shares_owned).sum();

    if available < shares {
        return Err(EquityError::validation(format!(
            "Shareholder {} owns {} active shares, cannot move {}",
            shareholder_id, available, shares
        )));
    }

    let now = now_rfc3339();
    let mut remaining = shares;
    let mut debited = Vec::new();
    for holding in holdings {
        if remaining == 0 {
            break;
        }
        let taken = remaining.min(holding.shares_owned);
        let left = holding.shares_owned - taken;
        let status = if left == 0 { "inactive" } else { "active" };
        let moved_investment = if left == 0 {
            holding.investment_amount
        } else {
            holding.investment_amount * taken as f64 / holding.shares_owned as f64
        };

        conn.execute(
            "UPDATE shareholdings
             SET shares_owned = ?1, investment_amount = ?2, status = ?3, updated_at = ?4
             WHERE id = ?5",
            params![left, holding.investment_amount - moved_investment, status, now, holding.id],
        )?;

        debited.push(DebitedLot {
            holding_id: holding.id,
            equity_type: holding.equity_type,
            shares: taken,
            investment_amount: moved_investment,
            terms: holding.vesting_terms(),
        });
        remaining -= taken;
    }

    Ok(debited)
}

/// Hand debited lots to another holder. Purchased shares merge into the
/// recipient's purchased lot; granted shares keep their vesting schedule in a
/// new grant row.
pub fn credit_lots(conn: &Connection, shareholder_id: &str, lots: &[DebitedLot]) -> Result<()> {
    for lot in lots {
        match lot.equity_type {
            EquityType::Purchased => {
                credit_purchased(conn, shareholder_id, lot.shares, lot.investment_amount)?;
            }
            EquityType::Granted => {
                insert_holding(
                    conn,
                    shareholder_id,
                    lot.shares,
                    EquityType::Granted,
                    lot.investment_amount,
                    &lot.terms,
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute(
            "INSERT INTO shareholders (id, name, holder_type, status, created_at)
             VALUES ('h1', 'Ada', 'founder', 'active', '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn
    }

    fn grant_terms() -> VestingTerms {
        VestingTerms {
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2029, 1, 1),
            percentage: 100.0,
        }
    }

    #[test]
    fn test_credit_purchased_merges_lots() {
        let conn = test_conn();

        let first = credit_purchased(&conn, "h1", 100, 1000.0).unwrap();
        let second = credit_purchased(&conn, "h1", 50, 500.0).unwrap();
        assert_eq!(first, second);

        let holdings = active_holdings_for(&conn, "h1").unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].shares_owned, 150);
        assert_eq!(holdings[0].investment_amount, 1500.0);
    }

    #[test]
    fn test_grant_round_trips_vesting_dates() {
        let conn = test_conn();
        insert_holding(&conn, "h1", 40, EquityType::Granted, 0.0, &grant_terms()).unwrap();

        let holding = &active_holdings_for(&conn, "h1").unwrap()[0];
        assert_eq!(holding.equity_type, EquityType::Granted);
        assert_eq!(holding.vesting_terms(), grant_terms());
    }

    #[test]
    fn test_debit_takes_purchased_first_and_deactivates_empty_rows() {
        let conn = test_conn();
        insert_holding(&conn, "h1", 40, EquityType::Granted, 0.0, &grant_terms()).unwrap();
        credit_purchased(&conn, "h1", 30, 300.0).unwrap();

        let lots = debit_shares(&conn, "h1", 50).unwrap();
        assert_eq!(lots.len(), 2);
        assert_eq!((lots[0].equity_type, lots[0].shares), (EquityType::Purchased, 30));
        assert_eq!(lots[0].investment_amount, 300.0);
        assert_eq!((lots[1].equity_type, lots[1].shares), (EquityType::Granted, 20));
        assert_eq!(lots[1].terms, grant_terms());

        let holdings = active_holdings_for(&conn, "h1").unwrap();
        assert_eq!(holdings.len(), 1, "purchased lot emptied and deactivated");
        assert_eq!(holdings[0].equity_type, EquityType::Granted);
        assert_eq!(holdings[0].shares_owned, 20);
        assert_eq!(active_shares_for(&conn, "h1").unwrap(), 20);
    }

    #[test]
    fn test_debit_moves_cost_basis_pro_rata() {
        let conn = test_conn();
        credit_purchased(&conn, "h1", 100, 100.0).unwrap();

        let lots = debit_shares(&conn, "h1", 30).unwrap();
        assert_eq!(lots[0].investment_amount, 30.0);

        let holding = &active_holdings_for(&conn, "h1").unwrap()[0];
        assert_eq!(holding.shares_owned, 70);
        assert_eq!(holding.investment_amount, 70.0);
    }

    #[test]
    fn test_credit_lots_keeps_grant_schedule() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO shareholders (id, name, holder_type, status, created_at)
             VALUES ('h2', 'Grace', 'employee', 'active', '2025-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        insert_holding(&conn, "h1", 40, EquityType::Granted, 0.0, &grant_terms()).unwrap();
        credit_purchased(&conn, "h1", 10, 50.0).unwrap();

        let lots = debit_shares(&conn, "h1", 30).unwrap();
        credit_lots(&conn, "h2", &lots).unwrap();

        let received = active_holdings_for(&conn, "h2").unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].equity_type, EquityType::Purchased);
        assert_eq!((received[0].shares_owned, received[0].investment_amount), (10, 50.0));
        assert_eq!(received[1].equity_type, EquityType::Granted);
        assert_eq!(received[1].shares_owned, 20);
        assert_eq!(received[1].vesting_terms(), grant_terms());
    }

    #[test]
    fn test_debit_overdraft_writes_nothing() {
        let conn = test_conn();
        credit_purchased(&conn, "h1", 30, 300.0).unwrap();

        let result = debit_shares(&conn, "h1", 31);
        assert!(matches!(result, Err(EquityError::Validation(_))));
        assert_eq!(active_shares_for(&conn, "h1").unwrap(), 30);
    }
}

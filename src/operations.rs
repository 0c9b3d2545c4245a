// ⚙️ Share issuance, transfer and buyback
//
// Each operation:
//   1. validates its input (no transaction yet)
//   2. opens one unit of work
//   3. re-reads config and balances, validates capacity, mutates, logs
//   4. commits; any error rolls the whole unit back
//
// Invariants after every operation:
//   issued_shares <= authorized_shares
//   Σ active shares_owned <= issued_shares

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{now_rfc3339, with_transaction};
use crate::error::{EquityError, Result};
use crate::holdings::{active_shares_for, credit_lots, credit_purchased, debit_shares, insert_holding};
use crate::ledger::{append_transaction, NewLedgerEntry, ShareTransaction, TransactionType};
use crate::shareholders::{get_shareholder, require_active};
use crate::shares::get_configuration;
use crate::valuation::{compute_strategic_value, price_per_share, ValuationCache};
use crate::vesting::{EquityType, VestingTerms};

/// Warn when an issuance leaves less than this share of the ceiling unissued
const LOW_CAPACITY_RATIO: f64 = 0.10;

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct IssueRequest {
    pub shareholder_id: String,
    pub shares_amount: i64,
    pub equity_type: EquityType,
    /// Defaults to the current strategic price per share
    #[serde(default)]
    pub price_per_share: Option<f64>,
    /// Defaults to shares × price for purchased equity, 0 for grants
    #[serde(default)]
    pub investment_amount: Option<f64>,
    #[serde(default)]
    pub vesting_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub vesting_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub vesting_percentage: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub from_shareholder_id: String,
    pub to_shareholder_id: String,
    pub shares_amount: i64,
    #[serde(default)]
    pub price_per_share: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuybackRequest {
    pub shareholder_id: String,
    pub shares_amount: i64,
    #[serde(default)]
    pub price_per_share: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DilutionImpact {
    pub issued_before: i64,
    pub issued_after: i64,
    /// Ownership lost by the pre-existing holders, as a percentage of their stake
    pub dilution_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuanceResult {
    pub transaction: ShareTransaction,
    pub holding_id: i64,
    pub remaining_capacity: i64,
    pub dilution: DilutionImpact,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub transaction: ShareTransaction,
    pub from_shares_after: i64,
    pub to_shares_after: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuybackResult {
    pub transaction: ShareTransaction,
    pub repurchase_value: f64,
    pub holder_shares_after: i64,
    pub issued_shares_after: i64,
}

// ============================================================================
// VALIDATION HELPERS
// ============================================================================

fn validate_amount(shares_amount: i64) -> Result<()> {
    if shares_amount <= 0 {
        return Err(EquityError::validation(format!(
            "shares_amount must be a positive integer, got {}",
            shares_amount
        )));
    }
    Ok(())
}

fn validate_money(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(EquityError::validation(format!(
            "{} must be a non-negative number, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Explicit price, or the current strategic price per share
fn resolve_price(conn: &Connection, cache: &dyn ValuationCache, explicit: Option<f64>) -> Result<f64> {
    match explicit {
        Some(price) => {
            validate_money("price_per_share", price)?;
            Ok(price)
        }
        None => {
            let config = get_configuration(conn)?;
            let valuation = compute_strategic_value(conn, cache)?;
            Ok(price_per_share(valuation.strategic_value, config.authorized_shares).max(0.0))
        }
    }
}

fn non_empty(reason: Option<String>) -> Option<String> {
    reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty())
}

// ============================================================================
// ISSUANCE
// ============================================================================

pub fn issue_shares(
    conn: &mut Connection,
    cache: &dyn ValuationCache,
    request: IssueRequest,
) -> Result<IssuanceResult> {
    validate_amount(request.shares_amount)?;

    let terms = match request.equity_type {
        EquityType::Granted => VestingTerms {
            start_date: request.vesting_start_date,
            end_date: request.vesting_end_date,
            percentage: request.vesting_percentage.unwrap_or(100.0),
        },
        EquityType::Purchased => VestingTerms {
            start_date: None,
            end_date: None,
            percentage: 100.0,
        },
    };
    terms.validate()?;

    let price = resolve_price(conn, cache, request.price_per_share)?;
    let investment = match (request.investment_amount, request.equity_type) {
        (Some(amount), _) => amount,
        (None, EquityType::Purchased) => request.shares_amount as f64 * price,
        (None, EquityType::Granted) => 0.0,
    };
    validate_money("investment_amount", investment)?;

    let shares = request.shares_amount;
    let reason = non_empty(request.reason);

    let result = with_transaction(conn, |tx| {
        require_active(tx, &request.shareholder_id)?;

        let config = get_configuration(tx)?;
        let capacity = config.unissued_capacity();
        if shares > capacity {
            return Err(EquityError::validation(format!(
                "Cannot issue {} shares: only {} of {} authorized shares are unissued",
                shares, capacity, config.authorized_shares
            )));
        }

        let issued_before = config.issued_shares;
        let issued_after = issued_before + shares;

        tx.execute(
            "UPDATE shares_config SET issued_shares = ?1, updated_at = ?2 WHERE id = 1",
            params![issued_after, now_rfc3339()],
        )?;

        let holding_id = match request.equity_type {
            EquityType::Purchased => credit_purchased(tx, &request.shareholder_id, shares, investment)?,
            EquityType::Granted => insert_holding(
                tx,
                &request.shareholder_id,
                shares,
                EquityType::Granted,
                investment,
                &terms,
            )?,
        };

        let transaction = append_transaction(
            tx,
            NewLedgerEntry {
                transaction_type: TransactionType::Issuance,
                from_shareholder_id: None,
                to_shareholder_id: Some(request.shareholder_id.clone()),
                shares_amount: shares,
                price_per_share: price,
                reason: reason.clone(),
            },
        )?;

        let dilution_percentage = if issued_before > 0 {
            shares as f64 / issued_after as f64 * 100.0
        } else {
            0.0
        };

        let remaining_capacity = config.authorized_shares - issued_after;
        let mut warnings = Vec::new();
        if dilution_percentage > 0.0 {
            warnings.push(format!(
                "Issuing {} shares dilutes existing holders by {:.2}%",
                shares, dilution_percentage
            ));
        }
        if (remaining_capacity as f64) < config.authorized_shares as f64 * LOW_CAPACITY_RATIO {
            warnings.push(format!(
                "Only {} authorized shares remain unissued",
                remaining_capacity
            ));
        }

        Ok(IssuanceResult {
            transaction,
            holding_id,
            remaining_capacity,
            dilution: DilutionImpact {
                issued_before,
                issued_after,
                dilution_percentage,
            },
            warnings,
        })
    })?;

    info!(
        shareholder_id = %request.shareholder_id,
        shares,
        equity_type = request.equity_type.as_str(),
        price,
        "shares issued"
    );

    Ok(result)
}

// ============================================================================
// TRANSFER
// ============================================================================

pub fn transfer_shares(
    conn: &mut Connection,
    cache: &dyn ValuationCache,
    request: TransferRequest,
) -> Result<TransferResult> {
    validate_amount(request.shares_amount)?;
    if request.from_shareholder_id == request.to_shareholder_id {
        return Err(EquityError::validation("Cannot transfer shares to the same shareholder"));
    }

    let price = resolve_price(conn, cache, request.price_per_share)?;
    let shares = request.shares_amount;
    let reason = non_empty(request.reason);

    let result = with_transaction(conn, |tx| {
        get_shareholder(tx, &request.from_shareholder_id)?;
        require_active(tx, &request.to_shareholder_id)?;

        let lots = debit_shares(tx, &request.from_shareholder_id, shares)?;
        credit_lots(tx, &request.to_shareholder_id, &lots)?;

        let transaction = append_transaction(
            tx,
            NewLedgerEntry {
                transaction_type: TransactionType::Transfer,
                from_shareholder_id: Some(request.from_shareholder_id.clone()),
                to_shareholder_id: Some(request.to_shareholder_id.clone()),
                shares_amount: shares,
                price_per_share: price,
                reason: reason.clone(),
            },
        )?;

        Ok(TransferResult {
            transaction,
            from_shares_after: active_shares_for(tx, &request.from_shareholder_id)?,
            to_shares_after: active_shares_for(tx, &request.to_shareholder_id)?,
        })
    })?;

    info!(
        from = %request.from_shareholder_id,
        to = %request.to_shareholder_id,
        shares,
        "shares transferred"
    );

    Ok(result)
}

// ============================================================================
// BUYBACK
// ============================================================================

pub fn buyback_shares(
    conn: &mut Connection,
    cache: &dyn ValuationCache,
    request: BuybackRequest,
) -> Result<BuybackResult> {
    validate_amount(request.shares_amount)?;

    let price = resolve_price(conn, cache, request.price_per_share)?;
    let shares = request.shares_amount;
    let reason = non_empty(request.reason);

    let result = with_transaction(conn, |tx| {
        get_shareholder(tx, &request.shareholder_id)?;
        debit_shares(tx, &request.shareholder_id, shares)?;

        tx.execute(
            "UPDATE shares_config SET issued_shares = issued_shares - ?1, updated_at = ?2 WHERE id = 1",
            params![shares, now_rfc3339()],
        )?;

        let transaction = append_transaction(
            tx,
            NewLedgerEntry {
                transaction_type: TransactionType::Buyback,
                from_shareholder_id: Some(request.shareholder_id.clone()),
                to_shareholder_id: None,
                shares_amount: shares,
                price_per_share: price,
                reason: reason.clone(),
            },
        )?;

        Ok(BuybackResult {
            repurchase_value: transaction.total_value,
            transaction,
            holder_shares_after: active_shares_for(tx, &request.shareholder_id)?,
            issued_shares_after: get_configuration(tx)?.issued_shares,
        })
    })?;

    info!(
        shareholder_id = %request.shareholder_id,
        shares,
        repurchase_value = result.repurchase_value,
        "shares bought back"
    );

    Ok(result)
}

// 📈 Shares Configuration Store
//
// One row (id = 1) holding the authorized ceiling, the issued count, par value
// and share class. Created lazily with defaults on first access.
//
// Invariant: issued_shares <= authorized_shares (also a SQL CHECK).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{now_rfc3339, parse_timestamp, with_transaction};
use crate::error::{EquityError, Result};
use crate::valuation::{compute_strategic_value, price_per_share, CompanyValuation, ValuationCache};

pub const DEFAULT_AUTHORIZED_SHARES: i64 = 1_000_000;
pub const DEFAULT_PAR_VALUE: f64 = 1.00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareClass {
    Common,
    Preferred,
}

impl ShareClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareClass::Common => "common",
            ShareClass::Preferred => "preferred",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "common" => Ok(ShareClass::Common),
            "preferred" => Ok(ShareClass::Preferred),
            other => Err(EquityError::validation(format!("Unknown share class: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharesConfig {
    pub authorized_shares: i64,
    pub issued_shares: i64,
    pub par_value: f64,
    pub class_type: ShareClass,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl SharesConfig {
    /// Shares that can still be issued
    pub fn unissued_capacity(&self) -> i64 {
        self.authorized_shares - self.issued_shares
    }

    /// Shares neither allocated to a holder nor issued
    pub fn unallocated_shares(&self, allocated: i64) -> i64 {
        self.authorized_shares - allocated.max(self.issued_shares)
    }
}

/// Typed partial update: only present fields are validated and written
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SharesConfigUpdate {
    #[serde(default)]
    pub authorized_shares: Option<i64>,
    #[serde(default)]
    pub class_type: Option<ShareClass>,
}

impl SharesConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.authorized_shares.is_none() && self.class_type.is_none()
    }
}

/// Payload of `GET /api/shares`
#[derive(Debug, Clone, Serialize)]
pub struct ShareSummary {
    pub authorized_shares: i64,
    pub issued_shares: i64,
    pub par_value: f64,
    pub class_type: ShareClass,
    pub status: String,
    pub valuation: CompanyValuation,
    pub shares_allocated: i64,
    pub shares_remaining: i64,
    pub price_per_share: f64,
    pub allocation_percentage: f64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn get_configuration(conn: &Connection) -> Result<SharesConfig> {
    conn.execute(
        "INSERT OR IGNORE INTO shares_config
            (id, authorized_shares, issued_shares, par_value, class_type, status, updated_at)
         VALUES (1, ?1, 0, ?2, 'common', 'active', ?3)",
        params![DEFAULT_AUTHORIZED_SHARES, DEFAULT_PAR_VALUE, now_rfc3339()],
    )?;

    let (authorized_shares, issued_shares, par_value, class_type, status, updated_at): (
        i64,
        i64,
        f64,
        String,
        String,
        String,
    ) = conn.query_row(
        "SELECT authorized_shares, issued_shares, par_value, class_type, status, updated_at
         FROM shares_config WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
    )?;

    Ok(SharesConfig {
        authorized_shares,
        issued_shares,
        par_value,
        class_type: ShareClass::parse(&class_type)?,
        status,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Σ shares_owned over active holdings
pub fn allocated_shares(conn: &Connection) -> Result<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(shares_owned), 0) FROM shareholdings WHERE status = 'active'",
        [],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn share_summary(conn: &Connection, cache: &dyn ValuationCache) -> Result<ShareSummary> {
    let config = get_configuration(conn)?;
    let allocated = allocated_shares(conn)?;
    let valuation = compute_strategic_value(conn, cache)?;
    let price = price_per_share(valuation.strategic_value, config.authorized_shares);

    let allocation_percentage = if config.authorized_shares > 0 {
        allocated as f64 / config.authorized_shares as f64 * 100.0
    } else {
        0.0
    };

    let shares_remaining = config.unallocated_shares(allocated);

    Ok(ShareSummary {
        authorized_shares: config.authorized_shares,
        issued_shares: config.issued_shares,
        par_value: config.par_value,
        class_type: config.class_type,
        status: config.status,
        valuation,
        shares_allocated: allocated,
        shares_remaining,
        price_per_share: price,
        allocation_percentage,
        updated_at: config.updated_at,
    })
}

// ============================================================================
// UPDATES
// ============================================================================

/// Change the authorized ceiling. Returns the remaining capacity.
pub fn update_authorized_shares(conn: &Connection, new_value: i64) -> Result<i64> {
    if new_value <= 0 {
        return Err(EquityError::validation(format!(
            "Authorized shares must be a positive integer, got {}",
            new_value
        )));
    }

    let config = get_configuration(conn)?;
    let allocated = allocated_shares(conn)?.max(config.issued_shares);

    if new_value < allocated {
        return Err(EquityError::Conflict {
            message: format!(
                "Cannot set authorized shares to {}: {} shares are already allocated",
                new_value, allocated
            ),
            allocated,
        });
    }

    conn.execute(
        "UPDATE shares_config SET authorized_shares = ?1, updated_at = ?2 WHERE id = 1",
        params![new_value, now_rfc3339()],
    )?;

    info!(
        old = config.authorized_shares,
        new = new_value,
        allocated,
        "authorized shares updated"
    );

    Ok(new_value - allocated)
}

pub fn update_class_type(conn: &Connection, class_type: ShareClass) -> Result<()> {
    get_configuration(conn)?;
    conn.execute(
        "UPDATE shares_config SET class_type = ?1, updated_at = ?2 WHERE id = 1",
        params![class_type.as_str(), now_rfc3339()],
    )?;
    Ok(())
}

/// Apply a partial update atomically and return the resulting configuration
pub fn update_configuration(conn: &mut Connection, update: &SharesConfigUpdate) -> Result<SharesConfig> {
    if update.is_empty() {
        return Err(EquityError::validation(
            "Nothing to update: provide authorized_shares or class_type",
        ));
    }

    with_transaction(conn, |tx| {
        if let Some(authorized) = update.authorized_shares {
            update_authorized_shares(tx, authorized)?;
        }
        if let Some(class_type) = update.class_type {
            update_class_type(tx, class_type)?;
        }
        get_configuration(tx)
    })
}

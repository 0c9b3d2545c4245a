// 💰 Valuation Bridge
//
// Strategic company value = accounting net worth + IP valuation + infrastructure
// replacement cost. Values are read from ledgers owned by other modules.
//
// The cache is injected so callers decide the policy: a short TTL in the
// server, no caching in tests or batch tools.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::Result;

// ============================================================================
// COMPANY VALUATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyValuation {
    /// Σ(acquisition_cost − accumulated_depreciation) over non-disposed assets
    pub total_assets: f64,

    /// Σ outstanding_amount over active and deferred liabilities
    pub total_liabilities: f64,

    pub accounting_net_worth: f64,
    pub ip_value: f64,
    pub infrastructure_value: f64,

    /// Net worth + IP + infrastructure
    pub strategic_value: f64,

    pub computed_at: DateTime<Utc>,
}

/// Price of one share given the company value and the authorized ceiling.
/// Returns 0 when no shares are authorized.
pub fn price_per_share(strategic_value: f64, authorized_shares: i64) -> f64 {
    if authorized_shares <= 0 {
        return 0.0;
    }
    strategic_value / authorized_shares as f64
}

// ============================================================================
// CACHE ABSTRACTION
// ============================================================================

pub trait ValuationCache: Send + Sync {
    fn get(&self) -> Option<CompanyValuation>;
    fn set(&self, valuation: CompanyValuation);
    fn invalidate(&self);
}

/// Single-slot cache that expires its value after `ttl`
pub struct TtlValuationCache {
    ttl: Duration,
    slot: Mutex<Option<(CompanyValuation, Instant)>>,
}

impl TtlValuationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }
}

impl ValuationCache for TtlValuationCache {
    fn get(&self) -> Option<CompanyValuation> {
        let slot = self.slot.lock().ok()?;
        match slot.as_ref() {
            Some((value, stored_at)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    fn set(&self, valuation: CompanyValuation) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((valuation, Instant::now()));
        }
    }

    fn invalidate(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

/// Always recomputes
#[derive(Debug, Default, Clone, Copy)]
pub struct NoValuationCache;

impl ValuationCache for NoValuationCache {
    fn get(&self) -> Option<CompanyValuation> {
        None
    }

    fn set(&self, _valuation: CompanyValuation) {}

    fn invalidate(&self) {}
}

/// Build the cache for a configured TTL (zero disables caching)
pub fn cache_for_ttl(ttl: Duration) -> Box<dyn ValuationCache> {
    if ttl.is_zero() {
        Box::new(NoValuationCache)
    } else {
        Box::new(TtlValuationCache::new(ttl))
    }
}

// ============================================================================
// COMPUTATION
// ============================================================================

fn sum_query(conn: &Connection, sql: &str) -> Result<f64> {
    let total: f64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(total)
}

/// Compute the valuation from the ledgers, bypassing any cache
pub fn compute_valuation(conn: &Connection) -> Result<CompanyValuation> {
    let total_assets = sum_query(
        conn,
        "SELECT COALESCE(SUM(acquisition_cost - accumulated_depreciation), 0.0)
         FROM assets
         WHERE status != 'disposed'",
    )?;

    let total_liabilities = sum_query(
        conn,
        "SELECT COALESCE(SUM(outstanding_amount), 0.0)
         FROM liabilities
         WHERE status IN ('active', 'deferred')",
    )?;

    let ip_value = sum_query(
        conn,
        "SELECT COALESCE(SUM(valuation_estimate), 0.0)
         FROM intellectual_property
         WHERE status IN ('active', 'scaling', 'maintenance')",
    )?;

    let infrastructure_value = sum_query(
        conn,
        "SELECT COALESCE(SUM(replacement_cost), 0.0)
         FROM infrastructure
         WHERE status = 'active'",
    )?;

    let accounting_net_worth = total_assets - total_liabilities;

    Ok(CompanyValuation {
        total_assets,
        total_liabilities,
        accounting_net_worth,
        ip_value,
        infrastructure_value,
        strategic_value: accounting_net_worth + ip_value + infrastructure_value,
        computed_at: Utc::now(),
    })
}

/// Strategic company value, served from `cache` when fresh
pub fn compute_strategic_value(
    conn: &Connection,
    cache: &dyn ValuationCache,
) -> Result<CompanyValuation> {
    if let Some(cached) = cache.get() {
        debug!(strategic_value = cached.strategic_value, "valuation cache hit");
        return Ok(cached);
    }

    let valuation = compute_valuation(conn)?;
    debug!(strategic_value = valuation.strategic_value, "valuation recomputed");
    cache.set(valuation.clone());

    Ok(valuation)
}

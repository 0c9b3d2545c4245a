// ⏳ Vesting Calculation
//
// Linear vesting between two calendar dates, counted in whole days.
// Purchased equity is never subject to vesting.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EquityError, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EquityType {
    Purchased,
    Granted,
}

impl EquityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquityType::Purchased => "PURCHASED",
            EquityType::Granted => "GRANTED",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.to_uppercase().as_str() {
            "PURCHASED" => Ok(EquityType::Purchased),
            "GRANTED" => Ok(EquityType::Granted),
            other => Err(EquityError::validation(format!("Unknown equity type: {}", other))),
        }
    }
}

/// Vesting terms attached to a holding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VestingTerms {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Share of the grant subject to the schedule, 0–100
    pub percentage: f64,
}

impl VestingTerms {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.percentage) || self.percentage.is_nan() {
            return Err(EquityError::validation(format!(
                "Vesting percentage must be between 0 and 100, got {}",
                self.percentage
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(EquityError::validation(format!(
                    "Vesting end date {} is before start date {}",
                    end, start
                )));
            }
        }
        Ok(())
    }
}

/// Parse a stored `YYYY-MM-DD` date. Malformed values are treated as absent.
pub fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok())
}

/// Fraction of the schedule elapsed on `today`, clamped to [0, 1].
///
/// Returns `None` when the schedule does not apply (missing dates or
/// end before start), which callers treat as fully vested.
pub fn vesting_progress(start: Option<NaiveDate>, end: Option<NaiveDate>, today: NaiveDate) -> Option<f64> {
    let (start, end) = (start?, end?);

    if end < start {
        return None;
    }

    let total_days = (end - start).num_days();
    if total_days == 0 {
        // Cliff on a single day
        return Some(if today >= end { 1.0 } else { 0.0 });
    }

    let elapsed_days = (today - start).num_days();
    Some((elapsed_days as f64 / total_days as f64).clamp(0.0, 1.0))
}

/// Number of vested shares on `today`
pub fn vested_shares(
    shares_owned: i64,
    equity_type: EquityType,
    terms: &VestingTerms,
    today: NaiveDate,
) -> i64 {
    if shares_owned <= 0 {
        return 0;
    }

    if equity_type == EquityType::Purchased {
        return shares_owned;
    }

    match vesting_progress(terms.start_date, terms.end_date, today) {
        Some(progress) => {
            let vested = (shares_owned as f64 * progress * terms.percentage / 100.0).floor() as i64;
            vested.clamp(0, shares_owned)
        }
        // Open question: unverified business intent, kept as fully vested
        None => shares_owned,
    }
}

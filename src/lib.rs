// Jeton - Equity Core Library
// Shares configuration, valuation bridge, cap table and share ledger.
// Used by the CLI, the API server and the tests.

pub mod config;
pub mod db;
pub mod error;
pub mod vesting;
pub mod valuation;
pub mod shares;
pub mod shareholders;
pub mod holdings;
pub mod ledger;
pub mod operations;
pub mod snapshot;
pub mod captable;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{open_database, setup_database, with_transaction};
pub use error::{EquityError, Result};
pub use vesting::{vested_shares, vesting_progress, EquityType, VestingTerms};
pub use valuation::{
    cache_for_ttl, compute_strategic_value, compute_valuation, price_per_share,
    CompanyValuation, NoValuationCache, TtlValuationCache, ValuationCache,
};
pub use shares::{
    allocated_shares, get_configuration, share_summary, update_authorized_shares,
    update_configuration, ShareClass, ShareSummary, SharesConfig, SharesConfigUpdate,
};
pub use shareholders::{
    create_shareholder, get_shareholder, list_shareholders, HolderType, NewShareholder, Shareholder,
};
pub use holdings::Shareholding;
pub use ledger::{
    list_transactions, transactions_for_shareholder, verify_ledger, LedgerVerification,
    ShareTransaction, TransactionType,
};
pub use operations::{
    buyback_shares, issue_shares, transfer_shares, BuybackRequest, BuybackResult, IssuanceResult,
    IssueRequest, TransferRequest, TransferResult,
};
pub use snapshot::{list_valuations, record_valuation, NewValuation, ValuationSnapshot};
pub use captable::{
    get_cap_table, shareholder_position, write_cap_table_csv, CapTable, CapTableRow, CapTableSummary,
    HoldingPosition, ShareholderPosition,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

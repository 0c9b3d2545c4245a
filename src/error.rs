// Error taxonomy for the equity core
//
// Validation and Conflict carry a message meant for the client.
// Database and Internal carry details that are only logged server-side.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EquityError {
    /// Bad input: non-positive shares, exceeding capacity, unknown enum values
    #[error("{0}")]
    Validation(String),

    /// Request conflicts with existing allocations
    #[error("{message}")]
    Conflict { message: String, allocated: i64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EquityError {
    pub fn validation(message: impl Into<String>) -> Self {
        EquityError::Validation(message.into())
    }

    /// True for errors whose message can be shown to the client as-is
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EquityError::Validation(_) | EquityError::Conflict { .. } | EquityError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EquityError>;

use serde::Serialize;
use thiserror::Error;

/// Errors reported by the storage ports.
///
/// Adapters translate backend failures into these variants so the
/// coordinator can tell an idempotency hit or an optimistic conflict apart
/// from an opaque failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// A concurrent transaction committed first.
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid user id: {0}")]
    InvalidUserId(u64),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("amount must be positive and count must be between 1 and {max}")]
    InvalidAmountOrCount { max: usize },
    #[error("at least one query filter must be provided")]
    MissingFilter,
    #[error("user account not found")]
    AccountNotExist,
    #[error("insufficient balance: balance {balance}, required {required}")]
    InsufficientBalance { balance: i64, required: i64 },
    #[error("invalid redeem code")]
    InvalidCode,
    #[error("redeem code already used")]
    AlreadyUsed,
    #[error("redeem code was claimed by a concurrent request")]
    CodeRaceLost,
    #[error("request already processed: {0}")]
    AlreadyProcessed(String),
    #[error("balance changed concurrently, resubmit with the same key")]
    ConcurrencyConflict,
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("malformed command input: {0}")]
    Input(#[from] csv::Error),
    #[error("failed to render response: {0}")]
    Render(serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("could not generate {count} distinct redeem codes in {attempts} attempts")]
    CodeGenerationExhausted { count: usize, attempts: usize },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Response codes surfaced to callers of the ledger contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RespCode {
    Success,
    BadRequest,
    AccountNotExist,
    InsufficientBalance,
    UnknownError,
}

impl LedgerError {
    pub fn resp_code(&self) -> RespCode {
        match self {
            Self::InvalidUserId(_)
            | Self::ValidationError(_)
            | Self::InvalidAmountOrCount { .. }
            | Self::MissingFilter
            | Self::Input(_) => RespCode::BadRequest,
            Self::AccountNotExist => RespCode::AccountNotExist,
            Self::InsufficientBalance { .. } => RespCode::InsufficientBalance,
            Self::InvalidCode
            | Self::AlreadyUsed
            | Self::CodeRaceLost
            | Self::AlreadyProcessed(_)
            | Self::ConcurrencyConflict
            | Self::Storage(_)
            | Self::Render(_)
            | Self::InvalidConfig(_)
            | Self::CodeGenerationExhausted { .. } => RespCode::UnknownError,
        }
    }
}

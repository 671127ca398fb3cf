use crate::error::{LedgerError, Result};

/// Shortest redeem code accepted; shorter codes are too easy to guess.
pub const MIN_REDEEM_CODE_LEN: usize = 8;
/// Upper bound for `max_batch_size`.
pub const MAX_BATCH_LIMIT: usize = 100;

/// Tunables for the ledger engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Page size used when a listing request does not specify one.
    pub default_page_size: usize,
    /// Hard cap on listing page sizes; larger requests are clamped.
    pub max_page_size: usize,
    /// Maximum number of redeem codes generated per batch.
    pub max_batch_size: usize,
    pub redeem_code_len: usize,
    pub account_no_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            max_page_size: 100,
            max_batch_size: 100,
            redeem_code_len: 16,
            account_no_len: 12,
        }
    }
}

impl LedgerConfig {
    /// Rejects settings the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.redeem_code_len < MIN_REDEEM_CODE_LEN {
            return Err(LedgerError::InvalidConfig(format!(
                "redeem code length must be at least {MIN_REDEEM_CODE_LEN}, got {}",
                self.redeem_code_len
            )));
        }
        if !(1..=MAX_BATCH_LIMIT).contains(&self.max_batch_size) {
            return Err(LedgerError::InvalidConfig(format!(
                "max batch size must be between 1 and {MAX_BATCH_LIMIT}, got {}",
                self.max_batch_size
            )));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(LedgerError::InvalidConfig(
                "page sizes must be at least 1".to_string(),
            ));
        }
        if self.account_no_len == 0 {
            return Err(LedgerError::InvalidConfig(
                "account number length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves a requested page size against the configured bounds.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        match requested {
            None | Some(0) => self.default_page_size.min(self.max_page_size),
            Some(n) => n.min(self.max_page_size),
        }
    }
}

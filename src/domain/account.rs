use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type AccountId = u64;

/// Number of trailing account-number characters left visible when masked.
const VISIBLE_ACCOUNT_NO_SUFFIX: usize = 4;

/// Represents a positive monetary amount in the smallest currency unit.
///
/// Payment amounts, top-up amounts and redeem code face values are all
/// `Amount`s; zero and negative values are rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self, LedgerError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(LedgerError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Account balance in the smallest currency unit. Never negative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Balance(i64);

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn new(value: i64) -> Option<Self> {
        (value >= 0).then_some(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Applies a signed delta, returning `None` if the result would be
    /// negative or overflow.
    pub fn apply(self, delta: i64) -> Option<Self> {
        self.0.checked_add(delta).and_then(Self::new)
    }

    pub fn covers(&self, amount: Amount) -> bool {
        self.0 >= amount.value()
    }
}

/// A user's pay account.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Account {
    /// Storage identifier, referenced by change log entries.
    pub id: AccountId,
    /// The owning user. At most one account exists per user.
    pub user_id: UserId,
    /// Display token. Only ever exposed through [`Account::masked_account_no`].
    pub account_no: String,
    pub balance: Balance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId, new_account: NewAccount) -> Self {
        Self {
            id,
            user_id: new_account.user_id,
            account_no: new_account.account_no,
            balance: Balance::ZERO,
            created_at: new_account.created_at,
            updated_at: new_account.created_at,
        }
    }

    pub fn masked_account_no(&self) -> String {
        mask_account_no(&self.account_no)
    }
}

/// An account that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub user_id: UserId,
    pub account_no: String,
    pub created_at: DateTime<Utc>,
}

/// Hides everything but the last few characters of an account number.
pub fn mask_account_no(account_no: &str) -> String {
    let len = account_no.chars().count();
    // Too short to reveal anything safely.
    let hidden = if len <= VISIBLE_ACCOUNT_NO_SUFFIX {
        len
    } else {
        len - VISIBLE_ACCOUNT_NO_SUFFIX
    };
    account_no
        .chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { '*' } else { c })
        .collect()
}

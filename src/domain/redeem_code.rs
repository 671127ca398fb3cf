use super::account::{Amount, UserId};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

pub type RedeemCodeId = u64;

/// A prepaid code worth a fixed amount, claimable by exactly one user.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct RedeemCode {
    pub id: RedeemCodeId,
    pub code: String,
    pub amount: Amount,
    /// `None` until claimed. Never changes after the claim.
    pub used_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RedeemCode {
    pub fn new(id: RedeemCodeId, code: NewRedeemCode) -> Self {
        Self {
            id,
            code: code.code,
            amount: code.amount,
            used_user_id: None,
            created_at: code.created_at,
            updated_at: code.created_at,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_user_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRedeemCode {
    pub code: String,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

/// Filter for redeem code listings. Results are ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeemCodeQuery {
    pub code: Option<String>,
    pub used: Option<bool>,
    pub limit: usize,
}

impl RedeemCodeQuery {
    pub fn matches(&self, code: &RedeemCode) -> bool {
        self.code.as_deref().is_none_or(|c| code.code == c)
            && self.used.is_none_or(|used| code.is_used() == used)
    }
}

/// Generates a random alphanumeric token of `len` characters.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

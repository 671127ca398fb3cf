use super::account::{AccountId, Amount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChangeLogId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Payment,
    TopUp,
}

/// An applied balance-affecting event. Immutable once persisted.
///
/// The `idempotent_key` is unique across all entries: a merchant `bizId` for
/// payments, the redeem code string for top-ups.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ChangeLogEntry {
    /// Store-assigned sequence number.
    pub id: ChangeLogId,
    pub account_id: AccountId,
    pub op_type: OpType,
    pub amount: Amount,
    pub idempotent_key: String,
    pub created_at: DateTime<Utc>,
}

impl ChangeLogEntry {
    pub fn new(id: ChangeLogId, entry: NewChangeLogEntry) -> Self {
        Self {
            id,
            account_id: entry.account_id,
            op_type: entry.op_type,
            amount: entry.amount,
            idempotent_key: entry.idempotent_key,
            created_at: entry.created_at,
        }
    }

    /// External pay-order identifier: `accountID_idempotentKey_sequence`.
    pub fn pay_order_id(&self) -> String {
        format!("{}_{}_{}", self.account_id, self.idempotent_key, self.id)
    }
}

/// A change log entry waiting for its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChangeLogEntry {
    pub account_id: AccountId,
    pub op_type: OpType,
    pub amount: Amount,
    pub idempotent_key: String,
    pub created_at: DateTime<Utc>,
}

impl NewChangeLogEntry {
    pub fn payment(account_id: AccountId, amount: Amount, biz_id: &str) -> Self {
        Self {
            account_id,
            op_type: OpType::Payment,
            amount,
            idempotent_key: biz_id.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn top_up(account_id: AccountId, amount: Amount, redeem_code: &str) -> Self {
        Self {
            account_id,
            op_type: OpType::TopUp,
            amount,
            idempotent_key: redeem_code.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Filter for change log lookups. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLogQuery {
    pub account_id: Option<AccountId>,
    pub idempotent_key: Option<String>,
    pub op_type: Option<OpType>,
    pub limit: usize,
}

impl ChangeLogQuery {
    pub fn matches(&self, entry: &ChangeLogEntry) -> bool {
        self.account_id.is_none_or(|id| entry.account_id == id)
            && self
                .idempotent_key
                .as_deref()
                .is_none_or(|key| entry.idempotent_key == key)
            && self.op_type.is_none_or(|op| entry.op_type == op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: ChangeLogId, account_id: AccountId, op_type: OpType, key: &str) -> ChangeLogEntry {
        ChangeLogEntry::new(
            id,
            NewChangeLogEntry {
                account_id,
                op_type,
                amount: Amount::new(100).unwrap(),
                idempotent_key: key.to_string(),
                created_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_pay_order_id_format() {
        let entry = entry(42, 3, OpType::Payment, "order-1");
        assert_eq!(entry.pay_order_id(), "3_order-1_42");
    }

    #[test]
    fn test_query_matches_all_filters() {
        let payment = entry(1, 3, OpType::Payment, "order-1");
        let top_up = entry(2, 3, OpType::TopUp, "CODE");

        let query = ChangeLogQuery {
            account_id: Some(3),
            op_type: Some(OpType::Payment),
            ..Default::default()
        };
        assert!(query.matches(&payment));
        assert!(!query.matches(&top_up));

        let by_key = ChangeLogQuery {
            idempotent_key: Some("CODE".to_string()),
            ..Default::default()
        };
        assert!(by_key.matches(&top_up));
        assert!(!by_key.matches(&payment));

        let other_account = ChangeLogQuery {
            account_id: Some(4),
            ..Default::default()
        };
        assert!(!other_account.matches(&payment));
    }

    #[test]
    fn test_op_type_serialization() {
        assert_eq!(serde_json::to_string(&OpType::TopUp).unwrap(), "\"top_up\"");
    }
}

use super::accounts::AccountLedger;
use super::change_log::ChangeLog;
use super::redeem_codes::RedeemCodeRegistry;
use crate::config::LedgerConfig;
use crate::domain::account::{Account, UserId};
use crate::domain::change_log::{ChangeLogEntry, ChangeLogQuery, OpType};
use crate::domain::redeem_code::{RedeemCode, RedeemCodeQuery};
use crate::error::{LedgerError, Result};
use serde::Serialize;
use tracing::warn;

/// An account as exposed to callers. The account number is masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub user_id: UserId,
    pub account_no: String,
    pub balance: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id,
            account_no: account.masked_account_no(),
            balance: account.balance.value(),
            created_at: account.created_at.timestamp(),
            updated_at: account.updated_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayOrderView {
    pub pay_order_id: String,
    pub amount: i64,
    /// Set when the history was looked up by user.
    pub user_id: Option<UserId>,
    pub created_at: i64,
}

impl PayOrderView {
    pub fn new(entry: &ChangeLogEntry, user_id: Option<UserId>) -> Self {
        Self {
            pay_order_id: entry.pay_order_id(),
            amount: entry.amount.value(),
            user_id,
            created_at: entry.created_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedeemCodeView {
    pub code: String,
    pub amount: i64,
    /// `0` while unclaimed.
    pub used_user_id: UserId,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&RedeemCode> for RedeemCodeView {
    fn from(code: &RedeemCode) -> Self {
        Self {
            code: code.code.clone(),
            amount: code.amount.value(),
            used_user_id: code.used_user_id.unwrap_or(0),
            created_at: code.created_at.timestamp(),
            updated_at: code.updated_at.timestamp(),
        }
    }
}

/// Pay history lookup. A zero user id or an empty biz id count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayHistoryQuery {
    pub user_id: Option<UserId>,
    pub biz_id: Option<String>,
    pub limit: Option<usize>,
}

/// Redeem code lookup. An empty code counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeemCodeFilter {
    pub code: Option<String>,
    pub used: Option<bool>,
    pub limit: Option<usize>,
}

/// Read-only projections. Nothing here opens a transaction.
#[derive(Clone)]
pub struct QueryService {
    accounts: AccountLedger,
    change_log: ChangeLog,
    redeem_codes: RedeemCodeRegistry,
    config: LedgerConfig,
}

impl QueryService {
    pub fn new(
        accounts: AccountLedger,
        change_log: ChangeLog,
        redeem_codes: RedeemCodeRegistry,
        config: LedgerConfig,
    ) -> Self {
        Self {
            accounts,
            change_log,
            redeem_codes,
            config,
        }
    }

    pub async fn get_account(&self, user_id: UserId) -> Result<Option<AccountView>> {
        let account = self.accounts.get_by_user_id(user_id).await?;
        Ok(account.as_ref().map(AccountView::from))
    }

    /// Payment entries only, newest first.
    pub async fn query_pay_history(&self, query: &PayHistoryQuery) -> Result<Vec<PayOrderView>> {
        let user_id = query.user_id.filter(|id| *id != 0);
        let biz_id = query.biz_id.clone().filter(|key| !key.is_empty());
        if user_id.is_none() && biz_id.is_none() {
            warn!("pay history query without filters");
            return Err(LedgerError::MissingFilter);
        }

        let account_id = match user_id {
            Some(user_id) => Some(self.accounts.require(user_id).await?.id),
            None => None,
        };
        let entries = self
            .change_log
            .query(&ChangeLogQuery {
                account_id,
                idempotent_key: biz_id,
                op_type: Some(OpType::Payment),
                limit: self.config.page_size(query.limit),
            })
            .await?;
        Ok(entries
            .iter()
            .map(|entry| PayOrderView::new(entry, user_id))
            .collect())
    }

    /// Ordered by id.
    pub async fn query_redeem_codes(&self, filter: &RedeemCodeFilter) -> Result<Vec<RedeemCodeView>> {
        let code = filter.code.clone().filter(|code| !code.is_empty());
        if code.is_none() && filter.used.is_none() {
            warn!("redeem code query without filters");
            return Err(LedgerError::MissingFilter);
        }

        let codes = self
            .redeem_codes
            .query(&RedeemCodeQuery {
                code,
                used: filter.used,
                limit: self.config.page_size(filter.limit),
            })
            .await?;
        Ok(codes.iter().map(RedeemCodeView::from).collect())
    }
}

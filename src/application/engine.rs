use super::accounts::AccountLedger;
use super::change_log::ChangeLog;
use super::coordinator::TransactionCoordinator;
use super::query::{
    AccountView, PayHistoryQuery, PayOrderView, QueryService, RedeemCodeFilter, RedeemCodeView,
};
use super::redeem_codes::RedeemCodeRegistry;
use crate::config::LedgerConfig;
use crate::domain::account::{Account, Amount, UserId};
use crate::domain::change_log::ChangeLogEntry;
use crate::domain::ports::LedgerPorts;
use crate::domain::redeem_code::RedeemCode;
use crate::error::{LedgerError, Result};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUpResult {
    pub top_up_amount: i64,
    pub current_balance: i64,
}

impl TopUpResult {
    pub fn new(account: &Account, code: &RedeemCode) -> Self {
        Self {
            top_up_amount: code.amount.value(),
            current_balance: account.balance.value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateResult {
    pub gen_success_cnt: usize,
    pub codes: Vec<String>,
}

/// The main entry point of the ledger.
///
/// `LedgerEngine` is built once at process start from a set of storage ports
/// and is cheap to clone; every clone shares the same store. Requests are
/// validated here before any storage access, then handed to the coordinator
/// (mutations) or the query service (reads).
#[derive(Clone)]
pub struct LedgerEngine {
    accounts: AccountLedger,
    redeem_codes: RedeemCodeRegistry,
    coordinator: TransactionCoordinator,
    queries: QueryService,
}

impl LedgerEngine {
    /// Creates a new `LedgerEngine` over the given ports.
    ///
    /// # Arguments
    ///
    /// * `ports` - The storage ports, usually all backed by one adapter.
    /// * `config` - Page sizes, batch limits and token lengths.
    pub fn new(ports: LedgerPorts, config: LedgerConfig) -> Self {
        let accounts = AccountLedger::new(ports.accounts, config.account_no_len);
        let change_log = ChangeLog::new(ports.change_logs);
        let redeem_codes = RedeemCodeRegistry::new(ports.redeem_codes, &config);
        let coordinator = TransactionCoordinator::new(
            accounts.clone(),
            change_log.clone(),
            redeem_codes.clone(),
            ports.unit_of_work,
        );
        let queries = QueryService::new(accounts.clone(), change_log, redeem_codes.clone(), config);
        Self {
            accounts,
            redeem_codes,
            coordinator,
            queries,
        }
    }

    /// Creates the user's account. Creating it twice returns the existing one.
    pub async fn create_account(&self, user_id: UserId) -> Result<Account> {
        self.accounts.create(user_id).await
    }

    pub async fn get_account(&self, user_id: UserId) -> Result<Option<AccountView>> {
        self.queries.get_account(user_id).await
    }

    /// Debits `amount` for the merchant order `biz_id`. Replaying the same
    /// `biz_id` fails with `AlreadyProcessed` and changes nothing.
    pub async fn pay(&self, user_id: UserId, biz_id: &str, amount: i64) -> Result<ChangeLogEntry> {
        if user_id == 0 {
            warn!(user_id, "pay rejected: invalid user id");
            return Err(LedgerError::InvalidUserId(user_id));
        }
        if biz_id.is_empty() {
            warn!(user_id, "pay rejected: empty biz id");
            return Err(LedgerError::ValidationError("biz id is required".to_string()));
        }
        let amount = Amount::new(amount).inspect_err(|_| {
            warn!(user_id, amount, "pay rejected: non-positive amount");
        })?;
        self.coordinator.pay(user_id, biz_id, amount).await
    }

    /// Redeems `code` into the user's account. Returns the account after the
    /// credit and the claimed code.
    pub async fn top_up(&self, user_id: UserId, code: &str) -> Result<(Account, RedeemCode)> {
        if user_id == 0 {
            warn!(user_id, "top-up rejected: invalid user id");
            return Err(LedgerError::InvalidUserId(user_id));
        }
        if code.is_empty() {
            warn!(user_id, "top-up rejected: empty redeem code");
            return Err(LedgerError::ValidationError(
                "redeem code is required".to_string(),
            ));
        }
        self.coordinator.top_up(user_id, code).await
    }

    pub async fn query_pay_history(&self, query: &PayHistoryQuery) -> Result<Vec<PayOrderView>> {
        self.queries.query_pay_history(query).await
    }

    pub async fn generate_redeem_codes(&self, amount: i64, count: usize) -> Result<GenerateResult> {
        let codes = self.redeem_codes.generate_batch(amount, count).await?;
        Ok(GenerateResult {
            gen_success_cnt: codes.len(),
            codes: codes.into_iter().map(|code| code.code).collect(),
        })
    }

    pub async fn query_redeem_codes(&self, filter: &RedeemCodeFilter) -> Result<Vec<RedeemCodeView>> {
        self.queries.query_redeem_codes(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use std::sync::Arc;

    fn engine() -> LedgerEngine {
        let store = Arc::new(InMemoryLedgerStore::new());
        LedgerEngine::new(LedgerPorts::from_store(store), LedgerConfig::default())
    }

    async fn funded(engine: &LedgerEngine, user_id: UserId, amount: i64) {
        engine.create_account(user_id).await.unwrap();
        let generated = engine.generate_redeem_codes(amount, 1).await.unwrap();
        engine.top_up(user_id, &generated.codes[0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_pay_request_validation() {
        let engine = engine();
        funded(&engine, 1, 100).await;

        let cases = [(0, "order-1", 10), (1, "", 10), (1, "order-1", 0), (1, "order-1", -5)];
        for (user_id, biz_id, amount) in cases {
            let err = engine.pay(user_id, biz_id, amount).await.unwrap_err();
            assert_eq!(err.resp_code(), crate::error::RespCode::BadRequest);
        }

        // None of the rejected requests consumed the key.
        engine.pay(1, "order-1", 10).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_account_is_idempotent() {
        let engine = engine();
        let first = engine.create_account(5).await.unwrap();
        let second = engine.create_account(5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.account_no.len(), 12);

        assert!(matches!(
            engine.create_account(0).await,
            Err(LedgerError::InvalidUserId(0))
        ));
    }

    #[tokio::test]
    async fn test_pay_replay_is_rejected() {
        let engine = engine();
        funded(&engine, 1, 200).await;

        let entry = engine.pay(1, "order-1", 100).await.unwrap();
        assert_eq!(entry.pay_order_id(), format!("{}_order-1_{}", entry.account_id, entry.id));

        let replay = engine.pay(1, "order-1", 100).await;
        assert!(matches!(replay, Err(LedgerError::AlreadyProcessed(key)) if key == "order-1"));

        let account = engine.get_account(1).await.unwrap().unwrap();
        assert_eq!(account.balance, 100);
    }

    #[tokio::test]
    async fn test_top_up_result() {
        let engine = engine();
        funded(&engine, 1, 100).await;
        let generated = engine.generate_redeem_codes(50, 1).await.unwrap();

        let (account, code) = engine.top_up(1, &generated.codes[0]).await.unwrap();
        let result = TopUpResult::new(&account, &code);
        assert_eq!(result.top_up_amount, 50);
        assert_eq!(result.current_balance, 150);

        assert!(matches!(
            engine.top_up(1, "").await,
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_limits() {
        let engine = engine();
        let result = engine.generate_redeem_codes(10, 100).await.unwrap();
        assert_eq!(result.gen_success_cnt, 100);
        assert!(result.codes.iter().all(|code| code.len() == 16));

        for (amount, count) in [(0, 1), (10, 0), (10, 101)] {
            assert!(matches!(
                engine.generate_redeem_codes(amount, count).await,
                Err(LedgerError::InvalidAmountOrCount { max: 100 })
            ));
        }
    }
}

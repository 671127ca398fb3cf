use super::account::{Account, AccountId, NewAccount, UserId};
use super::change_log::{ChangeLogEntry, ChangeLogQuery, NewChangeLogEntry};
use super::redeem_code::{NewRedeemCode, RedeemCode, RedeemCodeQuery};
use crate::error::StoreResult;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_by_user_id(&self, user_id: UserId) -> StoreResult<Option<Account>>;
    /// Fails with `StoreError::DuplicateKey` if the user already has an account.
    async fn create(&self, account: NewAccount) -> StoreResult<Account>;
}

#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    async fn query(&self, query: &ChangeLogQuery) -> StoreResult<Vec<ChangeLogEntry>>;
}

#[async_trait]
pub trait RedeemCodeStore: Send + Sync {
    /// Persists every code or none of them.
    async fn batch_insert(&self, codes: Vec<NewRedeemCode>) -> StoreResult<Vec<RedeemCode>>;
    async fn get_by_code(&self, code: &str) -> StoreResult<Option<RedeemCode>>;
    async fn query(&self, query: &RedeemCodeQuery) -> StoreResult<Vec<RedeemCode>>;
}

/// Opens atomic scopes over the ledger's entities.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn LedgerTransaction + 'a>>;
}

/// A transactional handle. Writes made through it become visible together
/// on [`LedgerTransaction::commit`]; dropping the handle without committing
/// discards them.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Fails with `StoreError::DuplicateKey` if the idempotent key exists.
    async fn append_change_log(&mut self, entry: NewChangeLogEntry) -> StoreResult<ChangeLogEntry>;

    /// Adds `delta` to the balance only if it currently equals
    /// `expected_balance` and the result stays non-negative. Returns the
    /// number of rows affected (0 or 1).
    async fn apply_delta(
        &mut self,
        account_id: AccountId,
        delta: i64,
        expected_balance: i64,
    ) -> StoreResult<u64>;

    /// Marks the code as used by `user_id` only if it is still unclaimed.
    /// Returns the number of rows affected (0 or 1).
    async fn claim_redeem_code(&mut self, code: &str, user_id: UserId) -> StoreResult<u64>;

    /// Fails with `StoreError::Conflict` if a concurrent commit invalidated
    /// one of this transaction's writes.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

pub type AccountStoreRef = Arc<dyn AccountStore>;
pub type ChangeLogStoreRef = Arc<dyn ChangeLogStore>;
pub type RedeemCodeStoreRef = Arc<dyn RedeemCodeStore>;
pub type UnitOfWorkRef = Arc<dyn UnitOfWork>;

/// The full set of ports a store adapter provides to the engine.
#[derive(Clone)]
pub struct LedgerPorts {
    pub accounts: AccountStoreRef,
    pub change_logs: ChangeLogStoreRef,
    pub redeem_codes: RedeemCodeStoreRef,
    pub unit_of_work: UnitOfWorkRef,
}

impl LedgerPorts {
    /// Wires every port to one shared adapter instance.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AccountStore + ChangeLogStore + RedeemCodeStore + UnitOfWork + 'static,
    {
        Self {
            accounts: store.clone(),
            change_logs: store.clone(),
            redeem_codes: store.clone(),
            unit_of_work: store,
        }
    }
}

use crate::domain::account::{Account, AccountId, Balance, NewAccount, UserId};
use crate::domain::change_log::{ChangeLogEntry, ChangeLogId, ChangeLogQuery, NewChangeLogEntry};
use crate::domain::ports::{
    AccountStore, ChangeLogStore, LedgerTransaction, RedeemCodeStore, UnitOfWork,
};
use crate::domain::redeem_code::{NewRedeemCode, RedeemCode, RedeemCodeQuery};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    account_ids: HashMap<UserId, AccountId>,
    change_logs: BTreeMap<ChangeLogId, ChangeLogEntry>,
    idempotent_keys: HashMap<String, ChangeLogId>,
    redeem_codes: HashMap<String, RedeemCode>,
}

impl LedgerState {
    fn balance_of(&self, account_id: AccountId) -> Option<Balance> {
        self.accounts.get(&account_id).map(|account| account.balance)
    }
}

/// Id generators. Ids consumed by rolled-back transactions are not reused.
#[derive(Default)]
struct Sequences {
    account: AtomicU64,
    change_log: AtomicU64,
    redeem_code: AtomicU64,
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// A thread-safe in-memory ledger store.
///
/// Committed state lives behind one `Arc<RwLock<..>>`. Transactions buffer
/// their writes and validate them again when committing, so a reader never
/// observes a half-applied transaction and the first of two conflicting
/// commits wins. Ideal for testing or for running without persistence.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    sequences: Arc<Sequences>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn get_by_user_id(&self, user_id: UserId) -> StoreResult<Option<Account>> {
        let state = self.state.read().await;
        Ok(state
            .account_ids
            .get(&user_id)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn create(&self, account: NewAccount) -> StoreResult<Account> {
        let mut state = self.state.write().await;
        if state.account_ids.contains_key(&account.user_id) {
            return Err(StoreError::DuplicateKey(format!(
                "account for user {}",
                account.user_id
            )));
        }
        let account = Account::new(next_id(&self.sequences.account), account);
        state.account_ids.insert(account.user_id, account.id);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }
}

#[async_trait]
impl ChangeLogStore for InMemoryLedgerStore {
    async fn query(&self, query: &ChangeLogQuery) -> StoreResult<Vec<ChangeLogEntry>> {
        let state = self.state.read().await;
        if let Some(key) = &query.idempotent_key {
            return Ok(state
                .idempotent_keys
                .get(key)
                .and_then(|id| state.change_logs.get(id))
                .filter(|entry| query.matches(entry))
                .cloned()
                .into_iter()
                .collect());
        }
        Ok(state
            .change_logs
            .values()
            .rev()
            .filter(|entry| query.matches(entry))
            .take(query.limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RedeemCodeStore for InMemoryLedgerStore {
    async fn batch_insert(&self, codes: Vec<NewRedeemCode>) -> StoreResult<Vec<RedeemCode>> {
        let mut state = self.state.write().await;
        {
            let mut seen = HashSet::with_capacity(codes.len());
            for code in &codes {
                if state.redeem_codes.contains_key(&code.code) || !seen.insert(code.code.as_str())
                {
                    return Err(StoreError::DuplicateKey(format!(
                        "redeem code {}",
                        code.code
                    )));
                }
            }
        }

        let inserted: Vec<RedeemCode> = codes
            .into_iter()
            .map(|code| RedeemCode::new(next_id(&self.sequences.redeem_code), code))
            .collect();
        for code in &inserted {
            state.redeem_codes.insert(code.code.clone(), code.clone());
        }
        Ok(inserted)
    }

    async fn get_by_code(&self, code: &str) -> StoreResult<Option<RedeemCode>> {
        let state = self.state.read().await;
        Ok(state.redeem_codes.get(code).cloned())
    }

    async fn query(&self, query: &RedeemCodeQuery) -> StoreResult<Vec<RedeemCode>> {
        let state = self.state.read().await;
        let mut codes: Vec<RedeemCode> = state
            .redeem_codes
            .values()
            .filter(|code| query.matches(code))
            .cloned()
            .collect();
        codes.sort_by_key(|code| code.id);
        codes.truncate(query.limit);
        Ok(codes)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryLedgerStore {
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn LedgerTransaction + 'a>> {
        Ok(Box::new(InMemoryTransaction {
            store: self,
            writes: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum PendingWrite {
    ChangeLog(ChangeLogEntry),
    Balance {
        account_id: AccountId,
        observed: Balance,
        updated: Balance,
    },
    Claim {
        code: String,
        user_id: UserId,
    },
}

/// Write-buffering transaction over [`InMemoryLedgerStore`].
pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryLedgerStore,
    writes: Vec<PendingWrite>,
}

impl InMemoryTransaction<'_> {
    fn pending_balance(&self, account_id: AccountId) -> Option<Balance> {
        self.writes.iter().rev().find_map(|write| match write {
            PendingWrite::Balance {
                account_id: id,
                updated,
                ..
            } if *id == account_id => Some(*updated),
            _ => None,
        })
    }

    fn has_pending_key(&self, key: &str) -> bool {
        self.writes.iter().any(
            |write| matches!(write, PendingWrite::ChangeLog(entry) if entry.idempotent_key == key),
        )
    }

    fn has_pending_claim(&self, code: &str) -> bool {
        self.writes
            .iter()
            .any(|write| matches!(write, PendingWrite::Claim { code: c, .. } if c == code))
    }

    /// Checks every buffered write against the committed state. An
    /// idempotent key committed by someone else is a duplicate, like a
    /// unique index would report it; every other mismatch is a conflict.
    fn validate(&self, state: &LedgerState) -> StoreResult<()> {
        let mut balances: HashMap<AccountId, Balance> = HashMap::new();
        for write in &self.writes {
            match write {
                PendingWrite::ChangeLog(entry) => {
                    if state.idempotent_keys.contains_key(&entry.idempotent_key) {
                        return Err(StoreError::DuplicateKey(entry.idempotent_key.clone()));
                    }
                }
                PendingWrite::Balance {
                    account_id,
                    observed,
                    updated,
                } => {
                    let current = balances
                        .get(account_id)
                        .copied()
                        .or_else(|| state.balance_of(*account_id));
                    if current != Some(*observed) {
                        return Err(StoreError::Conflict(format!(
                            "balance of account {account_id} changed concurrently"
                        )));
                    }
                    balances.insert(*account_id, *updated);
                }
                PendingWrite::Claim { code, .. } => {
                    if state.redeem_codes.get(code).is_none_or(RedeemCode::is_used) {
                        return Err(StoreError::Conflict(format!(
                            "redeem code {code} claimed concurrently"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction<'_> {
    async fn append_change_log(&mut self, entry: NewChangeLogEntry) -> StoreResult<ChangeLogEntry> {
        {
            let state = self.store.state.read().await;
            if state.idempotent_keys.contains_key(&entry.idempotent_key)
                || self.has_pending_key(&entry.idempotent_key)
            {
                return Err(StoreError::DuplicateKey(entry.idempotent_key));
            }
        }
        let entry = ChangeLogEntry::new(next_id(&self.store.sequences.change_log), entry);
        self.writes.push(PendingWrite::ChangeLog(entry.clone()));
        Ok(entry)
    }

    async fn apply_delta(
        &mut self,
        account_id: AccountId,
        delta: i64,
        expected_balance: i64,
    ) -> StoreResult<u64> {
        let current = match self.pending_balance(account_id) {
            Some(balance) => Some(balance),
            None => self.store.state.read().await.balance_of(account_id),
        };
        let Some(current) = current else {
            return Ok(0);
        };
        if current.value() != expected_balance {
            return Ok(0);
        }
        let Some(updated) = current.apply(delta) else {
            return Ok(0);
        };
        self.writes.push(PendingWrite::Balance {
            account_id,
            observed: current,
            updated,
        });
        Ok(1)
    }

    async fn claim_redeem_code(&mut self, code: &str, user_id: UserId) -> StoreResult<u64> {
        if self.has_pending_claim(code) {
            return Ok(0);
        }
        let claimable = {
            let state = self.store.state.read().await;
            state
                .redeem_codes
                .get(code)
                .is_some_and(|existing| !existing.is_used())
        };
        if !claimable {
            return Ok(0);
        }
        self.writes.push(PendingWrite::Claim {
            code: code.to_string(),
            user_id,
        });
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let store = self.store;
        let mut state = store.state.write().await;
        self.validate(&state)?;

        let now = Utc::now();
        for write in self.writes {
            match write {
                PendingWrite::ChangeLog(entry) => {
                    state
                        .idempotent_keys
                        .insert(entry.idempotent_key.clone(), entry.id);
                    state.change_logs.insert(entry.id, entry);
                }
                PendingWrite::Balance {
                    account_id,
                    updated,
                    ..
                } => {
                    if let Some(account) = state.accounts.get_mut(&account_id) {
                        account.balance = updated;
                        account.updated_at = now;
                    }
                }
                PendingWrite::Claim { code, user_id } => {
                    if let Some(redeem_code) = state.redeem_codes.get_mut(&code) {
                        redeem_code.used_user_id = Some(user_id);
                        redeem_code.updated_at = now;
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        tracing::debug!(discarded = self.writes.len(), "in-memory transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Amount;

    fn new_account(user_id: UserId) -> NewAccount {
        NewAccount {
            user_id,
            account_no: format!("ACCOUNT{user_id:05}"),
            created_at: Utc::now(),
        }
    }

    fn new_code(code: &str) -> NewRedeemCode {
        NewRedeemCode {
            code: code.to_string(),
            amount: Amount::new(50).unwrap(),
            created_at: Utc::now(),
        }
    }

    async fn funded_account(store: &InMemoryLedgerStore, user_id: UserId, balance: i64) -> Account {
        let account = store.create(new_account(user_id)).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.apply_delta(account.id, balance, 0).await.unwrap(), 1);
        tx.commit().await.unwrap();
        store.get_by_user_id(user_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_account_store() {
        let store = InMemoryLedgerStore::new();
        let account = store.create(new_account(1)).await.unwrap();
        assert_eq!(account.balance, Balance::ZERO);

        let retrieved = store.get_by_user_id(1).await.unwrap().unwrap();
        assert_eq!(retrieved, account);
        assert!(store.get_by_user_id(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_account_rejected() {
        let store = InMemoryLedgerStore::new();
        store.create(new_account(1)).await.unwrap();
        let result = store.create(new_account(1)).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_apply_delta_requires_expected_balance() {
        let store = InMemoryLedgerStore::new();
        let account = funded_account(&store, 1, 200).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.apply_delta(account.id, -100, 150).await.unwrap(), 0);
        assert_eq!(tx.apply_delta(account.id, -300, 200).await.unwrap(), 0);
        assert_eq!(tx.apply_delta(account.id, -100, 200).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let account = store.get_by_user_id(1).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), 100);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemoryLedgerStore::new();
        let account = funded_account(&store, 1, 200).await;

        let mut tx = store.begin().await.unwrap();
        tx.append_change_log(NewChangeLogEntry::payment(
            account.id,
            Amount::new(100).unwrap(),
            "order-1",
        ))
        .await
        .unwrap();
        tx.apply_delta(account.id, -100, 200).await.unwrap();

        let seen = store.get_by_user_id(1).await.unwrap().unwrap();
        assert_eq!(seen.balance.value(), 200);
        drop(tx);

        let query = ChangeLogQuery {
            idempotent_key: Some("order-1".to_string()),
            limit: 10,
            ..Default::default()
        };
        assert!(ChangeLogStore::query(&store, &query).await.unwrap().is_empty());
        let seen = store.get_by_user_id(1).await.unwrap().unwrap();
        assert_eq!(seen.balance.value(), 200);
    }

    #[tokio::test]
    async fn test_duplicate_idempotent_key() {
        let store = InMemoryLedgerStore::new();
        let account = funded_account(&store, 1, 200).await;
        let amount = Amount::new(10).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.append_change_log(NewChangeLogEntry::payment(account.id, amount, "order-1"))
            .await
            .unwrap();
        let in_tx = tx
            .append_change_log(NewChangeLogEntry::payment(account.id, amount, "order-1"))
            .await;
        assert!(matches!(in_tx, Err(StoreError::DuplicateKey(_))));
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let committed = tx
            .append_change_log(NewChangeLogEntry::payment(account.id, amount, "order-1"))
            .await;
        assert!(matches!(committed, Err(StoreError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_first_commit_wins() {
        let store = InMemoryLedgerStore::new();
        let account = funded_account(&store, 1, 200).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert_eq!(first.apply_delta(account.id, -50, 200).await.unwrap(), 1);
        assert_eq!(second.apply_delta(account.id, -70, 200).await.unwrap(), 1);

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(StoreError::Conflict(_))
        ));

        let account = store.get_by_user_id(1).await.unwrap().unwrap();
        assert_eq!(account.balance.value(), 150);
    }

    #[tokio::test]
    async fn test_same_key_committed_concurrently_is_duplicate() {
        let store = InMemoryLedgerStore::new();
        let account = funded_account(&store, 1, 200).await;
        let amount = Amount::new(10).unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        for tx in [&mut first, &mut second] {
            tx.append_change_log(NewChangeLogEntry::payment(account.id, amount, "order-1"))
                .await
                .unwrap();
        }

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(StoreError::DuplicateKey(key)) if key == "order-1"
        ));
    }

    #[tokio::test]
    async fn test_claim_redeem_code_once() {
        let store = InMemoryLedgerStore::new();
        store.batch_insert(vec![new_code("CODE1")]).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.claim_redeem_code("CODE1", 7).await.unwrap(), 1);
        assert_eq!(tx.claim_redeem_code("CODE1", 8).await.unwrap(), 0);
        assert_eq!(tx.claim_redeem_code("MISSING", 7).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let code = store.get_by_code("CODE1").await.unwrap().unwrap();
        assert_eq!(code.used_user_id, Some(7));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.claim_redeem_code("CODE1", 8).await.unwrap(), 0);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_insert_is_all_or_nothing() {
        let store = InMemoryLedgerStore::new();
        store.batch_insert(vec![new_code("A")]).await.unwrap();

        let result = store.batch_insert(vec![new_code("B"), new_code("A")]).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert!(store.get_by_code("B").await.unwrap().is_none());

        let result = store.batch_insert(vec![new_code("C"), new_code("C")]).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert!(store.get_by_code("C").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queries_respect_order_and_limit() {
        let store = InMemoryLedgerStore::new();
        let account = funded_account(&store, 1, 1_000).await;
        let amount = Amount::new(10).unwrap();
        for key in ["a", "b", "c"] {
            let mut tx = store.begin().await.unwrap();
            tx.append_change_log(NewChangeLogEntry::payment(account.id, amount, key))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        let query = ChangeLogQuery {
            account_id: Some(account.id),
            limit: 2,
            ..Default::default()
        };
        let keys: Vec<String> = ChangeLogStore::query(&store, &query)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.idempotent_key)
            .collect();
        assert_eq!(keys, vec!["c", "b"]);

        store
            .batch_insert(vec![new_code("X"), new_code("Y"), new_code("Z")])
            .await
            .unwrap();
        let query = RedeemCodeQuery {
            used: Some(false),
            limit: 2,
            ..Default::default()
        };
        let codes: Vec<String> = RedeemCodeStore::query(&store, &query)
            .await
            .unwrap()
            .into_iter()
            .map(|code| code.code)
            .collect();
        assert_eq!(codes, vec!["X", "Y"]);
    }
}

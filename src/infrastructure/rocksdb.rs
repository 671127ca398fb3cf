use crate::domain::account::{Account, AccountId, NewAccount, UserId};
use crate::domain::change_log::{ChangeLogEntry, ChangeLogQuery, NewChangeLogEntry};
use crate::domain::ports::{
    AccountStore, ChangeLogStore, LedgerTransaction, RedeemCodeStore, UnitOfWork,
};
use crate::domain::redeem_code::{NewRedeemCode, RedeemCode, RedeemCodeQuery};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, ErrorKind, IteratorMode, OptimisticTransactionDB,
    Options, Transaction,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Column Family for account records, keyed by account id.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family mapping user ids to account ids (one account per user).
pub const CF_ACCOUNT_USERS: &str = "account_users";
/// Column Family for change log entries, keyed by sequence number.
pub const CF_CHANGE_LOGS: &str = "change_logs";
/// Column Family mapping idempotent keys to change log sequence numbers.
pub const CF_IDEMPOTENT_KEYS: &str = "idempotent_keys";
/// Column Family for redeem codes, keyed by the code string.
pub const CF_REDEEM_CODES: &str = "redeem_codes";

const COLUMN_FAMILIES: [&str; 5] = [
    CF_ACCOUNTS,
    CF_ACCOUNT_USERS,
    CF_CHANGE_LOGS,
    CF_IDEMPOTENT_KEYS,
    CF_REDEEM_CODES,
];

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain => StoreError::Conflict(err.into_string()),
            _ => StoreError::Backend(Box::new(err)),
        }
    }
}

fn decode_id(bytes: &[u8]) -> StoreResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Backend("malformed id key".into()))?;
    Ok(u64::from_be_bytes(raw))
}

#[derive(Default)]
struct Sequences {
    account: AtomicU64,
    change_log: AtomicU64,
    redeem_code: AtomicU64,
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

/// A persistent ledger store using RocksDB.
///
/// Uses an optimistic transaction database: a transaction tracks the keys it
/// reads for update, and its commit fails with `Busy` if any of them was
/// written by another transaction in the meantime. Unique indexes (user id,
/// idempotent key, redeem code) live in their own Column Families so that
/// uniqueness checks are ordinary tracked reads.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<OptimisticTransactionDB>,
    sequences: Arc<Sequences>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist and resumes the id
    /// sequences from the persisted data.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db: OptimisticTransactionDB =
            OptimisticTransactionDB::open_cf_descriptors(&opts, path, descriptors)?;

        let store = Self {
            db: Arc::new(db),
            sequences: Arc::new(Sequences::default()),
        };
        store.resume_sequences()?;
        Ok(store)
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("{name} column family not found").into()))
    }

    fn last_id(&self, name: &str) -> StoreResult<u64> {
        match self.db.iterator_cf(self.cf(name)?, IteratorMode::End).next() {
            Some(item) => {
                let (key, _value) = item?;
                decode_id(&key)
            }
            None => Ok(0),
        }
    }

    fn resume_sequences(&self) -> StoreResult<()> {
        self.sequences
            .account
            .store(self.last_id(CF_ACCOUNTS)?, Ordering::Relaxed);
        self.sequences
            .change_log
            .store(self.last_id(CF_CHANGE_LOGS)?, Ordering::Relaxed);

        let mut max_code_id = 0;
        for item in self
            .db
            .iterator_cf(self.cf(CF_REDEEM_CODES)?, IteratorMode::Start)
        {
            let (_key, value) = item?;
            let code: RedeemCode = serde_json::from_slice(&value)?;
            max_code_id = max_code_id.max(code.id);
        }
        self.sequences
            .redeem_code
            .store(max_code_id, Ordering::Relaxed);
        Ok(())
    }

    fn get_change_log(&self, id_bytes: &[u8]) -> StoreResult<Option<ChangeLogEntry>> {
        match self.db.get_cf(self.cf(CF_CHANGE_LOGS)?, id_bytes)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn get_by_user_id(&self, user_id: UserId) -> StoreResult<Option<Account>> {
        let Some(account_id) = self
            .db
            .get_cf(self.cf(CF_ACCOUNT_USERS)?, user_id.to_be_bytes())?
        else {
            return Ok(None);
        };
        match self.db.get_cf(self.cf(CF_ACCOUNTS)?, &account_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, account: NewAccount) -> StoreResult<Account> {
        let users = self.cf(CF_ACCOUNT_USERS)?;
        let accounts = self.cf(CF_ACCOUNTS)?;
        let user_key = account.user_id.to_be_bytes();
        let duplicate = || StoreError::DuplicateKey(format!("account for user {}", account.user_id));

        let txn = self.db.transaction();
        if txn.get_for_update_cf(users, user_key, true)?.is_some() {
            return Err(duplicate());
        }
        let created = Account::new(next_id(&self.sequences.account), account.clone());
        txn.put_cf(users, user_key, created.id.to_be_bytes())?;
        txn.put_cf(
            accounts,
            created.id.to_be_bytes(),
            serde_json::to_vec(&created)?,
        )?;
        // The user index is the only contended key, so losing the commit
        // means another request created this user's account first.
        txn.commit().map_err(|err| match StoreError::from(err) {
            StoreError::Conflict(_) => duplicate(),
            other => other,
        })?;
        Ok(created)
    }
}

#[async_trait]
impl ChangeLogStore for RocksDBStore {
    async fn query(&self, query: &ChangeLogQuery) -> StoreResult<Vec<ChangeLogEntry>> {
        if let Some(key) = &query.idempotent_key {
            let Some(id) = self
                .db
                .get_cf(self.cf(CF_IDEMPOTENT_KEYS)?, key.as_bytes())?
            else {
                return Ok(Vec::new());
            };
            return Ok(self
                .get_change_log(&id)?
                .filter(|entry| query.matches(entry))
                .into_iter()
                .collect());
        }

        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(self.cf(CF_CHANGE_LOGS)?, IteratorMode::End)
        {
            if entries.len() >= query.limit {
                break;
            }
            let (_key, value) = item?;
            let entry: ChangeLogEntry = serde_json::from_slice(&value)?;
            if query.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl RedeemCodeStore for RocksDBStore {
    async fn batch_insert(&self, codes: Vec<NewRedeemCode>) -> StoreResult<Vec<RedeemCode>> {
        let cf = self.cf(CF_REDEEM_CODES)?;
        let txn = self.db.transaction();
        let mut inserted = Vec::with_capacity(codes.len());
        for code in codes {
            // Reads through the transaction also see codes written earlier
            // in this batch.
            if txn.get_for_update_cf(cf, code.code.as_bytes(), true)?.is_some() {
                return Err(StoreError::DuplicateKey(format!("redeem code {}", code.code)));
            }
            let code = RedeemCode::new(next_id(&self.sequences.redeem_code), code);
            txn.put_cf(cf, code.code.as_bytes(), serde_json::to_vec(&code)?)?;
            inserted.push(code);
        }
        txn.commit()?;
        Ok(inserted)
    }

    async fn get_by_code(&self, code: &str) -> StoreResult<Option<RedeemCode>> {
        match self.db.get_cf(self.cf(CF_REDEEM_CODES)?, code.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn query(&self, query: &RedeemCodeQuery) -> StoreResult<Vec<RedeemCode>> {
        if let Some(code) = &query.code {
            return Ok(self
                .get_by_code(code)
                .await?
                .filter(|found| query.matches(found))
                .into_iter()
                .collect());
        }

        let mut codes = Vec::new();
        for item in self
            .db
            .iterator_cf(self.cf(CF_REDEEM_CODES)?, IteratorMode::Start)
        {
            let (_key, value) = item?;
            let code: RedeemCode = serde_json::from_slice(&value)?;
            if query.matches(&code) {
                codes.push(code);
            }
        }
        codes.sort_by_key(|code| code.id);
        codes.truncate(query.limit);
        Ok(codes)
    }
}

#[async_trait]
impl UnitOfWork for RocksDBStore {
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn LedgerTransaction + 'a>> {
        Ok(Box::new(RocksDBTransaction {
            store: self,
            txn: self.db.transaction(),
        }))
    }
}

/// An optimistic RocksDB transaction. Dropping it without committing rolls
/// it back.
pub struct RocksDBTransaction<'a> {
    store: &'a RocksDBStore,
    txn: Transaction<'a, OptimisticTransactionDB>,
}

#[async_trait]
impl LedgerTransaction for RocksDBTransaction<'_> {
    async fn append_change_log(&mut self, entry: NewChangeLogEntry) -> StoreResult<ChangeLogEntry> {
        let keys = self.store.cf(CF_IDEMPOTENT_KEYS)?;
        let logs = self.store.cf(CF_CHANGE_LOGS)?;
        if self
            .txn
            .get_for_update_cf(keys, entry.idempotent_key.as_bytes(), true)?
            .is_some()
        {
            return Err(StoreError::DuplicateKey(entry.idempotent_key));
        }

        let entry = ChangeLogEntry::new(next_id(&self.store.sequences.change_log), entry);
        let id = entry.id.to_be_bytes();
        self.txn
            .put_cf(keys, entry.idempotent_key.as_bytes(), id)?;
        self.txn.put_cf(logs, id, serde_json::to_vec(&entry)?)?;
        Ok(entry)
    }

    async fn apply_delta(
        &mut self,
        account_id: AccountId,
        delta: i64,
        expected_balance: i64,
    ) -> StoreResult<u64> {
        let accounts = self.store.cf(CF_ACCOUNTS)?;
        let key = account_id.to_be_bytes();
        let Some(bytes) = self.txn.get_for_update_cf(accounts, key, true)? else {
            return Ok(0);
        };
        let mut account: Account = serde_json::from_slice(&bytes)?;
        if account.balance.value() != expected_balance {
            return Ok(0);
        }
        let Some(updated) = account.balance.apply(delta) else {
            return Ok(0);
        };
        account.balance = updated;
        account.updated_at = Utc::now();
        self.txn
            .put_cf(accounts, key, serde_json::to_vec(&account)?)?;
        Ok(1)
    }

    async fn claim_redeem_code(&mut self, code: &str, user_id: UserId) -> StoreResult<u64> {
        let cf = self.store.cf(CF_REDEEM_CODES)?;
        let Some(bytes) = self.txn.get_for_update_cf(cf, code.as_bytes(), true)? else {
            return Ok(0);
        };
        let mut redeem_code: RedeemCode = serde_json::from_slice(&bytes)?;
        if redeem_code.is_used() {
            return Ok(0);
        }
        redeem_code.used_user_id = Some(user_id);
        redeem_code.updated_at = Utc::now();
        self.txn
            .put_cf(cf, code.as_bytes(), serde_json::to_vec(&redeem_code)?)?;
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.txn.commit()?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.txn.rollback()?;
        Ok(())
    }
}

use crate::domain::account::{Account, NewAccount, UserId};
use crate::domain::ports::{AccountStoreRef, LedgerTransaction};
use crate::domain::redeem_code::random_token;
use crate::error::{LedgerError, Result, StoreError};
use chrono::Utc;
use tracing::{error, info, warn};

/// Account lookup, creation and the balance compare-and-swap.
#[derive(Clone)]
pub struct AccountLedger {
    accounts: AccountStoreRef,
    account_no_len: usize,
}

impl AccountLedger {
    pub fn new(accounts: AccountStoreRef, account_no_len: usize) -> Self {
        Self {
            accounts,
            account_no_len,
        }
    }

    /// Creates the user's account, or returns the existing one.
    pub async fn create(&self, user_id: UserId) -> Result<Account> {
        if user_id == 0 {
            error!(user_id, "invalid user id");
            return Err(LedgerError::InvalidUserId(user_id));
        }
        if let Some(existing) = self.get_by_user_id(user_id).await? {
            warn!(user_id, "user account already exists");
            return Ok(existing);
        }

        let new_account = NewAccount {
            user_id,
            account_no: random_token(self.account_no_len),
            created_at: Utc::now(),
        };
        match self.accounts.create(new_account).await {
            Ok(account) => {
                info!(user_id, account_id = account.id, "user account created");
                Ok(account)
            }
            // Lost a creation race; the winner's account is the result.
            Err(StoreError::DuplicateKey(_)) => {
                warn!(user_id, "user account created concurrently");
                self.require(user_id).await
            }
            Err(err) => {
                error!(user_id, error = %err, "failed to create user account");
                Err(err.into())
            }
        }
    }

    pub async fn get_by_user_id(&self, user_id: UserId) -> Result<Option<Account>> {
        self.accounts.get_by_user_id(user_id).await.map_err(|err| {
            error!(user_id, error = %err, "failed to get user account");
            err.into()
        })
    }

    /// Like [`AccountLedger::get_by_user_id`], but a missing account is an
    /// `AccountNotExist` error.
    pub async fn require(&self, user_id: UserId) -> Result<Account> {
        self.get_by_user_id(user_id).await?.ok_or_else(|| {
            warn!(user_id, "user account not found");
            LedgerError::AccountNotExist
        })
    }

    /// Applies `delta` to the balance read into `account`, within `tx`.
    ///
    /// Zero affected rows means the balance moved since `account` was read
    /// (or a debit no longer fits) and is reported as a conflict.
    pub async fn apply_delta(
        &self,
        tx: &mut (dyn LedgerTransaction + '_),
        account: &Account,
        delta: i64,
    ) -> Result<()> {
        let expected = account.balance.value();
        let rows = tx.apply_delta(account.id, delta, expected).await?;
        if rows == 0 {
            warn!(
                account_id = account.id,
                delta,
                expected,
                "balance compare-and-swap affected no rows"
            );
            return Err(LedgerError::ConcurrencyConflict);
        }
        Ok(())
    }
}

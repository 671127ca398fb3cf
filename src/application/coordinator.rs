use super::accounts::AccountLedger;
use super::change_log::ChangeLog;
use super::redeem_codes::RedeemCodeRegistry;
use crate::domain::account::{Account, Amount, UserId};
use crate::domain::change_log::{ChangeLogEntry, NewChangeLogEntry};
use crate::domain::ports::{LedgerTransaction, UnitOfWorkRef};
use crate::domain::redeem_code::RedeemCode;
use crate::error::{LedgerError, Result, StoreError};
use tracing::{error, info, warn};

/// Runs "pay" and "top-up" as single atomic scopes.
///
/// Each operation reads and validates outside the scope, then opens one
/// transaction, performs its ordered steps against it and commits. The first
/// failing step rolls back everything done in the scope. Conflicts are
/// surfaced to the caller; nothing is retried here.
#[derive(Clone)]
pub struct TransactionCoordinator {
    accounts: AccountLedger,
    change_log: ChangeLog,
    redeem_codes: RedeemCodeRegistry,
    unit_of_work: UnitOfWorkRef,
}

impl TransactionCoordinator {
    pub fn new(
        accounts: AccountLedger,
        change_log: ChangeLog,
        redeem_codes: RedeemCodeRegistry,
        unit_of_work: UnitOfWorkRef,
    ) -> Self {
        Self {
            accounts,
            change_log,
            redeem_codes,
            unit_of_work,
        }
    }

    /// Debits `amount` from the user's account, keyed by the merchant's
    /// `biz_id`.
    #[tracing::instrument(skip(self, amount), fields(amount = amount.value()))]
    pub async fn pay(&self, user_id: UserId, biz_id: &str, amount: Amount) -> Result<ChangeLogEntry> {
        let account = self.accounts.require(user_id).await?;
        if !account.balance.covers(amount) {
            warn!(
                balance = account.balance.value(),
                "insufficient balance for payment"
            );
            return Err(LedgerError::InsufficientBalance {
                balance: account.balance.value(),
                required: amount.value(),
            });
        }

        let mut tx = self.unit_of_work.begin().await?;
        let outcome = self.pay_in(tx.as_mut(), &account, biz_id, amount).await;
        let committed = finish(tx, outcome).await;
        let entry = self.replay_or(committed, biz_id).await?;
        info!(change_log_id = entry.id, "payment committed");
        Ok(entry)
    }

    /// A conflict whose key has meanwhile been committed by a concurrent
    /// request is reported as the replay it is.
    async fn replay_or<T>(&self, result: Result<T>, key: &str) -> Result<T> {
        match result {
            Err(LedgerError::ConcurrencyConflict) if self.change_log.contains_key(key).await? => {
                warn!(idempotent_key = key, "conflicting request was already processed");
                Err(LedgerError::AlreadyProcessed(key.to_string()))
            }
            other => other,
        }
    }

    async fn pay_in(
        &self,
        tx: &mut (dyn LedgerTransaction + '_),
        account: &Account,
        biz_id: &str,
        amount: Amount,
    ) -> Result<ChangeLogEntry> {
        let entry = self
            .change_log
            .append(tx, NewChangeLogEntry::payment(account.id, amount, biz_id))
            .await?;
        self.accounts
            .apply_delta(tx, account, -amount.value())
            .await?;
        Ok(entry)
    }

    /// Claims `code` for the user and credits its amount.
    ///
    /// Returns the account as re-read after the commit and the claimed code.
    #[tracing::instrument(skip(self))]
    pub async fn top_up(&self, user_id: UserId, code: &str) -> Result<(Account, RedeemCode)> {
        let account = self.accounts.require(user_id).await?;
        let Some(redeem_code) = self.redeem_codes.get_by_code(code).await? else {
            warn!("redeem code not found");
            return Err(LedgerError::InvalidCode);
        };
        if redeem_code.is_used() {
            warn!(used_by = redeem_code.used_user_id, "redeem code already used");
            return Err(LedgerError::AlreadyUsed);
        }

        let mut tx = self.unit_of_work.begin().await?;
        let outcome = self
            .top_up_in(tx.as_mut(), &account, &redeem_code, user_id)
            .await;
        let entry = finish(tx, outcome).await?;
        info!(
            change_log_id = entry.id,
            amount = redeem_code.amount.value(),
            "top-up committed"
        );

        let account = self.accounts.require(user_id).await?;
        let claimed = self
            .redeem_codes
            .get_by_code(code)
            .await?
            .ok_or(LedgerError::InvalidCode)?;
        Ok((account, claimed))
    }

    async fn top_up_in(
        &self,
        tx: &mut (dyn LedgerTransaction + '_),
        account: &Account,
        redeem_code: &RedeemCode,
        user_id: UserId,
    ) -> Result<ChangeLogEntry> {
        self.redeem_codes
            .claim(tx, &redeem_code.code, user_id)
            .await?;
        // The claim already serializes top-ups per code; the unique key
        // backs it up.
        let entry = self
            .change_log
            .append(
                tx,
                NewChangeLogEntry::top_up(account.id, redeem_code.amount, &redeem_code.code),
            )
            .await?;
        self.accounts
            .apply_delta(tx, account, redeem_code.amount.value())
            .await?;
        Ok(entry)
    }
}

/// Commits `tx` if every step succeeded, otherwise rolls it back and
/// returns the step's error.
async fn finish<T>(tx: Box<dyn LedgerTransaction + '_>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(|err| match err {
                StoreError::DuplicateKey(key) => {
                    warn!(idempotent_key = %key, "key committed by a concurrent transaction");
                    LedgerError::AlreadyProcessed(key)
                }
                StoreError::Conflict(reason) => {
                    warn!(%reason, "commit lost to a concurrent transaction");
                    LedgerError::ConcurrencyConflict
                }
                other => {
                    error!(error = %other, "failed to commit transaction");
                    LedgerError::Storage(other)
                }
            })?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "failed to roll back transaction");
            }
            Err(err)
        }
    }
}

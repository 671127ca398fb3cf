use crate::domain::change_log::{ChangeLogEntry, ChangeLogQuery, NewChangeLogEntry};
use crate::domain::ports::{ChangeLogStoreRef, LedgerTransaction};
use crate::error::{LedgerError, Result, StoreError};
use tracing::{error, warn};

/// The append-only ledger of applied events and the idempotency gate.
#[derive(Clone)]
pub struct ChangeLog {
    store: ChangeLogStoreRef,
}

impl ChangeLog {
    pub fn new(store: ChangeLogStoreRef) -> Self {
        Self { store }
    }

    /// Appends `entry` within `tx`. A key that was already applied fails
    /// with `AlreadyProcessed`, which aborts the whole scope.
    pub async fn append(
        &self,
        tx: &mut (dyn LedgerTransaction + '_),
        entry: NewChangeLogEntry,
    ) -> Result<ChangeLogEntry> {
        let account_id = entry.account_id;
        match tx.append_change_log(entry).await {
            Ok(entry) => Ok(entry),
            Err(StoreError::DuplicateKey(key)) => {
                warn!(account_id, idempotent_key = %key, "change log entry already exists");
                Err(LedgerError::AlreadyProcessed(key))
            }
            Err(err) => {
                error!(account_id, error = %err, "failed to append change log entry");
                Err(err.into())
            }
        }
    }

    /// Whether an entry with `key` has been committed.
    pub async fn contains_key(&self, key: &str) -> Result<bool> {
        let found = self
            .query(&ChangeLogQuery {
                idempotent_key: Some(key.to_string()),
                limit: 1,
                ..Default::default()
            })
            .await?;
        Ok(!found.is_empty())
    }

    pub async fn query(&self, query: &ChangeLogQuery) -> Result<Vec<ChangeLogEntry>> {
        self.store.query(query).await.map_err(|err| {
            error!(error = %err, "failed to query change log");
            err.into()
        })
    }
}

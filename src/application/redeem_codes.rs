use crate::config::LedgerConfig;
use crate::domain::account::{Amount, UserId};
use crate::domain::ports::{LedgerTransaction, RedeemCodeStoreRef};
use crate::domain::redeem_code::{NewRedeemCode, RedeemCode, RedeemCodeQuery, random_token};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{error, info, warn};

/// Random draws allowed per requested code before a batch gives up.
const MAX_ATTEMPTS_PER_CODE: usize = 8;

/// Generation, lookup and claiming of redeem codes.
#[derive(Clone)]
pub struct RedeemCodeRegistry {
    store: RedeemCodeStoreRef,
    code_len: usize,
    max_batch_size: usize,
}

impl RedeemCodeRegistry {
    pub fn new(store: RedeemCodeStoreRef, config: &LedgerConfig) -> Self {
        Self {
            store,
            code_len: config.redeem_code_len,
            max_batch_size: config.max_batch_size,
        }
    }

    /// Generates `count` codes worth `amount` each and persists them in one
    /// all-or-nothing insert.
    ///
    /// Collisions inside the batch are regenerated, up to a bounded number
    /// of draws. A collision with an already persisted code fails the whole
    /// batch.
    pub async fn generate_batch(&self, amount: i64, count: usize) -> Result<Vec<RedeemCode>> {
        let invalid = || LedgerError::InvalidAmountOrCount {
            max: self.max_batch_size,
        };
        let amount = Amount::new(amount).map_err(|_| invalid())?;
        if count == 0 || count > self.max_batch_size {
            error!(count, "invalid redeem code batch size");
            return Err(invalid());
        }

        let created_at = Utc::now();
        let mut seen = HashSet::with_capacity(count);
        let mut batch = Vec::with_capacity(count);
        let max_attempts = count.saturating_mul(MAX_ATTEMPTS_PER_CODE);
        let mut attempts = 0;
        while batch.len() < count {
            if attempts == max_attempts {
                error!(
                    count,
                    attempts,
                    code_len = self.code_len,
                    "gave up generating distinct redeem codes"
                );
                return Err(LedgerError::CodeGenerationExhausted { count, attempts });
            }
            attempts += 1;
            let code = random_token(self.code_len);
            if !seen.insert(code.clone()) {
                warn!(code = %code, "duplicate redeem code generated, regenerating");
                continue;
            }
            batch.push(NewRedeemCode {
                code,
                amount,
                created_at,
            });
        }

        let codes = self.store.batch_insert(batch).await.map_err(|err| {
            error!(error = %err, "failed to insert redeem code batch");
            LedgerError::from(err)
        })?;
        info!(
            count = codes.len(),
            amount = amount.value(),
            "redeem codes generated"
        );
        Ok(codes)
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<RedeemCode>> {
        self.store.get_by_code(code).await.map_err(|err| {
            error!(code, error = %err, "failed to get redeem code");
            err.into()
        })
    }

    /// Claims `code` for `user_id` within `tx`. Losing the race to another
    /// claim fails with `CodeRaceLost`.
    pub async fn claim(
        &self,
        tx: &mut (dyn LedgerTransaction + '_),
        code: &str,
        user_id: UserId,
    ) -> Result<()> {
        let rows = tx.claim_redeem_code(code, user_id).await?;
        if rows == 0 {
            warn!(code, user_id, "redeem code was already claimed");
            return Err(LedgerError::CodeRaceLost);
        }
        info!(code, user_id, "redeem code claimed");
        Ok(())
    }

    pub async fn query(&self, query: &RedeemCodeQuery) -> Result<Vec<RedeemCode>> {
        self.store.query(query).await.map_err(|err| {
            error!(error = %err, "failed to query redeem codes");
            err.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn new_registry(config: &LedgerConfig) -> RedeemCodeRegistry {
        RedeemCodeRegistry::new(Arc::new(InMemoryLedgerStore::new()), config)
    }

    #[tokio::test]
    async fn test_generate_batch_codes_are_distinct() {
        let registry = new_registry(&LedgerConfig::default());
        let codes = registry.generate_batch(10, 100).await.unwrap();

        let distinct: HashSet<&str> = codes.iter().map(|code| code.code.as_str()).collect();
        assert_eq!(distinct.len(), 100);
        assert!(codes.iter().all(|code| !code.is_used()));
    }

    #[tokio::test]
    async fn test_generate_batch_stops_when_tokens_keep_colliding() {
        // Empty tokens always collide after the first one.
        let registry = new_registry(&LedgerConfig {
            redeem_code_len: 0,
            ..Default::default()
        });
        let result = registry.generate_batch(50, 2).await;
        assert!(matches!(
            result,
            Err(LedgerError::CodeGenerationExhausted {
                count: 2,
                attempts: 16
            })
        ));

        // 62 one-character tokens exist; asking for more cannot succeed.
        let registry = new_registry(&LedgerConfig {
            redeem_code_len: 1,
            ..Default::default()
        });
        let result = registry.generate_batch(50, 63).await;
        assert!(matches!(
            result,
            Err(LedgerError::CodeGenerationExhausted { count: 63, .. })
        ));
        let persisted = registry
            .query(&RedeemCodeQuery {
                used: Some(false),
                limit: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(persisted.is_empty());
    }
}

use crate::application::engine::LedgerEngine;
use crate::domain::account::UserId;
use crate::error::Result;
use serde::Deserialize;
use tracing::{error, info, warn};

/// Published when a user activates their profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserActivation {
    pub user_id: UserId,
    pub activate_time: i64,
}

/// Opens an account for a newly activated user.
///
/// A payload that does not decode is logged and acknowledged, since
/// redelivering it can never succeed. Failures to create the account are
/// returned so the caller can leave the message for redelivery.
pub async fn process_user_activation(engine: &LedgerEngine, payload: &[u8]) -> Result<()> {
    let event: UserActivation = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(err) => {
            warn!(
                error = %err,
                payload = %String::from_utf8_lossy(payload),
                "failed to decode user activation message"
            );
            return Ok(());
        }
    };

    match engine.create_account(event.user_id).await {
        Ok(account) => {
            info!(
                user_id = event.user_id,
                account_id = account.id,
                activate_time = event.activate_time,
                "user account ready after activation"
            );
            Ok(())
        }
        Err(err) => {
            error!(user_id = event.user_id, error = %err, "failed to create account on activation");
            Err(err)
        }
    }
}

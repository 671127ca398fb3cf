#![allow(dead_code)]

use redeem_ledger::application::engine::LedgerEngine;
use redeem_ledger::config::LedgerConfig;
use redeem_ledger::domain::ports::LedgerPorts;
use redeem_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use serde_json::Value;
use std::io::{Error, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const HEADER: &str = "op,user,key,amount,count,used";

pub fn in_memory_engine() -> LedgerEngine {
    in_memory_engine_with(LedgerConfig::default())
}

pub fn in_memory_engine_with(config: LedgerConfig) -> LedgerEngine {
    engine_over(Arc::new(InMemoryLedgerStore::new()), config)
}

/// An engine over `store`, for tests that also drive the store directly.
pub fn engine_over(store: Arc<InMemoryLedgerStore>, config: LedgerConfig) -> LedgerEngine {
    LedgerEngine::new(LedgerPorts::from_store(store), config)
}

/// Creates `user_id`'s account and tops it up with a fresh code of `amount`.
pub async fn funded_account(engine: &LedgerEngine, user_id: u64, amount: i64) {
    engine.create_account(user_id).await.unwrap();
    let generated = engine.generate_redeem_codes(amount, 1).await.unwrap();
    engine.top_up(user_id, &generated.codes[0]).await.unwrap();
}

/// Writes a command file with the standard header followed by `rows`.
pub fn write_commands(rows: &[&str]) -> Result<NamedTempFile, Error> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{HEADER}")?;
    for row in rows {
        writeln!(file, "{row}")?;
    }
    file.flush()?;
    Ok(file)
}

/// Parses the binary's stdout, one JSON response per line.
pub fn parse_responses(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

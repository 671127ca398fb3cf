use clap::Parser;
use miette::{IntoDiagnostic, Result};
use redeem_ledger::application::engine::LedgerEngine;
use redeem_ledger::config::LedgerConfig;
use redeem_ledger::domain::ports::LedgerPorts;
use redeem_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use redeem_ledger::interfaces::csv::command_reader::CommandReader;
use redeem_ledger::interfaces::dispatch::{Response, dispatch};
use redeem_ledger::telemetry;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input ledger commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Page size for listings that do not ask for one
    #[arg(long, env = "LEDGER_DEFAULT_PAGE_SIZE", default_value_t = 100)]
    default_page_size: usize,

    /// Upper bound for listing page sizes
    #[arg(long, env = "LEDGER_MAX_PAGE_SIZE", default_value_t = 100)]
    max_page_size: usize,

    /// Maximum number of redeem codes per generated batch
    #[arg(long, env = "LEDGER_MAX_BATCH_SIZE", default_value_t = 100)]
    max_batch_size: usize,

    #[arg(long, env = "LEDGER_REDEEM_CODE_LEN", default_value_t = 16)]
    redeem_code_len: usize,

    #[arg(long, env = "LEDGER_ACCOUNT_NO_LEN", default_value_t = 12)]
    account_no_len: usize,
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
            max_batch_size: self.max_batch_size,
            redeem_code_len: self.redeem_code_len,
            account_no_len: self.account_no_len,
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_ports(db_path: Option<PathBuf>) -> Result<LedgerPorts> {
    use redeem_ledger::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(&path).into_diagnostic()?;
            info!(path = %path.display(), "using RocksDB storage");
            Ok(LedgerPorts::from_store(Arc::new(store)))
        }
        None => Ok(LedgerPorts::from_store(Arc::new(InMemoryLedgerStore::new()))),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_ports(db_path: Option<PathBuf>) -> Result<LedgerPorts> {
    if db_path.is_some() {
        tracing::warn!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(LedgerPorts::from_store(Arc::new(InMemoryLedgerStore::new())))
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    let config = cli.config();
    config.validate().into_diagnostic()?;
    let engine = LedgerEngine::new(open_ports(cli.db_path)?, config);

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut processed = 0usize;
    for (line, command) in reader.commands() {
        let response = match command {
            Ok(command) => dispatch(&engine, line, command).await,
            Err(err) => {
                tracing::warn!(line, error = %err, "skipping malformed command");
                Response::new(line, None, Err(err))
            }
        };
        let json = serde_json::to_string(&response).into_diagnostic()?;
        writeln!(out, "{json}").into_diagnostic()?;
        processed += 1;
    }
    out.flush().into_diagnostic()?;
    info!(processed, "command batch finished");

    Ok(())
}

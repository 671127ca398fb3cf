use crate::domain::account::UserId;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOp {
    Create,
    Account,
    Pay,
    TopUp,
    History,
    Generate,
    Codes,
}

/// One ledger command. Which columns are required depends on `op`; unused
/// columns may be left empty or omitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandRecord {
    pub op: CommandOp,
    #[serde(default)]
    pub user: Option<UserId>,
    /// Biz id for `pay` and `history`, redeem code for `topup` and `codes`.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    /// Batch size for `generate`, page size for listings.
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub used: Option<bool>,
}

/// Reads ledger commands from a CSV source with an
/// `op,user,key,amount,count,used` header.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes commands, each paired with the source line its
    /// record starts on (the header is line 1). Quoted fields may span lines.
    pub fn commands(self) -> impl Iterator<Item = (u64, Result<CommandRecord>)> {
        let mut reader = self.reader;
        let headers = reader.headers().cloned().ok();
        reader.into_records().map(move |result| match result {
            Ok(record) => {
                let line = record.position().map_or(0, |pos| pos.line());
                let command = record
                    .deserialize::<CommandRecord>(headers.as_ref())
                    .map_err(LedgerError::from);
                (line, command)
            }
            Err(err) => {
                let line = err.position().map_or(0, |pos| pos.line());
                (line, Err(err.into()))
            }
        })
    }
}

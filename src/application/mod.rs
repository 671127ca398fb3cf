//! Application layer orchestrating the ledger's business rules.
//!
//! `LedgerEngine` is the composition root. It wires the account ledger, the
//! change log and the redeem code registry over a set of storage ports and
//! exposes them through the transaction coordinator (pay, top-up) and the
//! query service (read-only views).

pub mod accounts;
pub mod change_log;
pub mod coordinator;
pub mod engine;
pub mod query;
pub mod redeem_codes;

//! Domain model: accounts, the change log, redeem codes, and the storage
//! ports the application layer depends on.

pub mod account;
pub mod change_log;
pub mod ports;
pub mod redeem_code;

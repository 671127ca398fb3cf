//! Inbound adapters: the CSV command driver and the user-activation handler.

pub mod csv;
pub mod dispatch;
pub mod events;

//! Cross-cutting services: billing, date inference, result write-back.

pub mod billing;
pub mod dates;
pub mod writeback;

pub use billing::Billing;

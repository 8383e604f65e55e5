//! Core domain + application logic for the expense ledger bot.
//!
//! This crate is intentionally framework-agnostic. Telegram / OpenAI / Google Sheets
//! live behind ports (traits) implemented in adapter crates.

pub mod categories;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod expense;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod security;

pub use errors::{Error, Result};

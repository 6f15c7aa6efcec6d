//! Core domain + application logic for the post generator bot.
//!
//! This crate is framework-agnostic. Telegram and Mistral live behind ports
//! (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod generation;
pub mod logging;
pub mod messaging;
pub mod security;
pub mod utils;

pub use errors::{Error, Result};

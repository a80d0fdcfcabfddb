//! Core domain + application logic for the Telegram media mirror.
//!
//! This crate is framework-agnostic. Telegram, the media toolchain and the
//! object store live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod index;
pub mod logging;
pub mod mirror;
pub mod object_store;
pub mod ports;
pub mod utils;

pub use errors::{Error, Result};

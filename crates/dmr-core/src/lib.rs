//! Core domain + application logic for the DM relay bridge.
//!
//! This crate is intentionally platform-agnostic. The Discord REST/gateway
//! surface lives behind the chat port (trait) implemented in the adapter
//! crate, so everything here is testable against an in-memory fake.

pub mod cache;
pub mod chat;
pub mod config;
pub mod confirm;
pub mod domain;
pub mod errors;
pub mod forward;
pub mod logging;
pub mod relay;
pub mod security;
pub mod store;

pub use errors::{Error, Result};

//! Subcommand implementations.

pub mod account;
pub mod session;

//! Cloud Kitchen Core - Shared domain types.
//!
//! This crate provides the types shared by all Cloud Kitchen components:
//! - `storefront` - Session, identity, cart and checkout client core
//! - `cli` - Terminal front end for account and session management
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no async.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, prices, emails, phones, roles and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;

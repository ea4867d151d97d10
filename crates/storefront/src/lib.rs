//! Cloud Kitchen storefront client core.
//!
//! Session lifecycle, identity modes (signed in, guest, anonymous), the
//! single-restaurant cart and order placement, running against the hosted
//! backend through the ports in [`backend`].
//!
//! [`state::Storefront`] wires everything together for an application.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod error;
pub mod guest;
pub mod identity;
pub mod models;
pub mod profile;
pub mod session;
pub mod state;
pub mod storage;
pub mod validation;

pub use state::{Backend, Storefront, StorefrontOptions};

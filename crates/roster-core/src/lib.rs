//! Core types and operations for scheduled access on a terminal.
//!
//! Identities hold per-axis schedule rules; a reconciliation pass removes the
//! ones whose rules say they must be absent and restores them later from a
//! saved snapshot. This crate is free of HTTP and database dependencies: the
//! terminal and the store are reached through the [`directory::Directory`]
//! and [`store::RestrictionStore`] traits.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod attendance;
pub mod directory;
pub mod error;
pub mod evaluate;
pub mod legacy;
pub mod lifecycle;
pub mod memory;
pub mod reconcile;
pub mod schedule;
pub mod snapshot;
pub mod store;

pub use error::{Error, Result};

//! Arbor Core — domain models, error taxonomy, repository traits, and the
//! pure planning logic shared by the storage and authorization crates.
//!
//! Nothing in this crate performs I/O. The nested-set layout, membership
//! reconciliation, and orphan checks are computed here and executed by
//! `arbor-db` inside a single transaction.

pub mod error;
pub mod identifier;
pub mod models;
pub mod nested_set;
pub mod reconcile;
pub mod repository;
pub mod slug;

pub use error::{ArborError, ArborResult};

//! Domain models for Arbor.
//!
//! These are the types exchanged between the repositories, the
//! authorization layer, and whatever transport sits in front of them.

pub mod audit;
pub mod membership;
pub mod organization;
pub mod permission;
pub mod role;
pub mod session;
pub mod user;

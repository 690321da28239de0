//! Arbor Authz — permission classification, the per-user permission
//! cache, and the service facade that authorizes every operation before
//! it reaches a repository.

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod service;

pub use cache::PermissionCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthzConfig;
pub use engine::{Authorizer, PermissionCategory, check};
pub use error::AuthzError;
pub use service::IamService;

//! Session domain model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The acting user of a single request.
///
/// Identity is verified upstream; a session is built per request and
/// discarded afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
}

impl Session {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

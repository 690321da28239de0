//! Classification of caller-supplied identifiers.

use uuid::Uuid;

use crate::error::{ArborError, ArborResult};

/// How a search string should be matched against stored entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The string is an opaque identifier.
    Id(Uuid),
    /// A slug, display name, or (for users) an email.
    Handle(String),
}

impl Lookup {
    pub fn parse(search: &str) -> ArborResult<Self> {
        let search = search.trim();
        if search.is_empty() {
            return Err(ArborError::invalid("identifier", "must not be empty"));
        }
        Ok(match Uuid::parse_str(search) {
            Ok(id) => Lookup::Id(id),
            Err(_) => Lookup::Handle(search.to_owned()),
        })
    }
}

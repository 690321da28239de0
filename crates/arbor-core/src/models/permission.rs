//! Permission domain model.
//!
//! Permissions form a closed enumeration split into four contiguous
//! ranges (read, create, modify, delete). Each range opens with an
//! `*_ANY` value that grants the whole range. `SUPER` sits outside every
//! range and satisfies any check. `END` terminates the enumeration and is
//! never grantable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArborError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum Permission {
    Super = 1,

    ReadAny = 100,
    ReadUser = 101,
    ReadOrganization = 102,
    ReadRole = 103,
    ReadEvent = 104,

    CreateAny = 200,
    CreateUser = 201,
    CreateOrganization = 202,
    CreateRole = 203,

    ModifyAny = 300,
    ModifyUser = 301,
    ModifyOrganization = 302,
    ModifyRole = 303,

    DeleteAny = 400,
    DeleteUser = 401,
    DeleteOrganization = 402,
    DeleteRole = 403,

    End = 500,
}

impl Permission {
    /// Every value that may be granted to a role.
    pub const GRANTABLE: [Permission; 18] = [
        Permission::Super,
        Permission::ReadAny,
        Permission::ReadUser,
        Permission::ReadOrganization,
        Permission::ReadRole,
        Permission::ReadEvent,
        Permission::CreateAny,
        Permission::CreateUser,
        Permission::CreateOrganization,
        Permission::CreateRole,
        Permission::ModifyAny,
        Permission::ModifyUser,
        Permission::ModifyOrganization,
        Permission::ModifyRole,
        Permission::DeleteAny,
        Permission::DeleteUser,
        Permission::DeleteOrganization,
        Permission::DeleteRole,
    ];

    /// Stable numeric code used for range classification.
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn is_grantable(self) -> bool {
        self != Permission::End
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Super => "SUPER",
            Permission::ReadAny => "READ_ANY",
            Permission::ReadUser => "READ_USER",
            Permission::ReadOrganization => "READ_ORGANIZATION",
            Permission::ReadRole => "READ_ROLE",
            Permission::ReadEvent => "READ_EVENT",
            Permission::CreateAny => "CREATE_ANY",
            Permission::CreateUser => "CREATE_USER",
            Permission::CreateOrganization => "CREATE_ORGANIZATION",
            Permission::CreateRole => "CREATE_ROLE",
            Permission::ModifyAny => "MODIFY_ANY",
            Permission::ModifyUser => "MODIFY_USER",
            Permission::ModifyOrganization => "MODIFY_ORGANIZATION",
            Permission::ModifyRole => "MODIFY_ROLE",
            Permission::DeleteAny => "DELETE_ANY",
            Permission::DeleteUser => "DELETE_USER",
            Permission::DeleteOrganization => "DELETE_ORGANIZATION",
            Permission::DeleteRole => "DELETE_ROLE",
            Permission::End => "END",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ArborError;

    /// Parses a grantable permission name. `END` is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::GRANTABLE
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ArborError::invalid("permission", format!("unknown permission '{s}'")))
    }
}

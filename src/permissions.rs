use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::models::Group;

// Group names. Provisioning creates them; role assignment places users in them.
pub const VIEWERS_GROUP: &str = "Viewers";
pub const EDITORS_GROUP: &str = "Editors";
pub const ADMINS_GROUP: &str = "Admins";

/// Role
///
/// Coarse-grained user category driving page-level access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum Role {
    Admin,
    Librarian,
    Member,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Librarian, Role::Member];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Librarian => "Librarian",
            Role::Member => "Member",
        }
    }

    /// The permission group a user with this role belongs to.
    pub fn group_name(&self) -> &'static str {
        match self {
            Role::Admin => ADMINS_GROUP,
            Role::Librarian => EDITORS_GROUP,
            Role::Member => VIEWERS_GROUP,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

/// Permission
///
/// Fine-grained action grant on the Book resource. The set is closed: a group or a
/// user can only ever hold members of this enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum Permission {
    #[serde(rename = "book:view")]
    BookView,
    #[serde(rename = "book:create")]
    BookCreate,
    #[serde(rename = "book:edit")]
    BookEdit,
    #[serde(rename = "book:delete")]
    BookDelete,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::BookView,
        Permission::BookCreate,
        Permission::BookEdit,
        Permission::BookDelete,
    ];

    pub fn codename(&self) -> &'static str {
        match self {
            Permission::BookView => "book:view",
            Permission::BookCreate => "book:create",
            Permission::BookEdit => "book:edit",
            Permission::BookDelete => "book:delete",
        }
    }

    pub fn resource(&self) -> &'static str {
        "book"
    }

    pub fn action(&self) -> &'static str {
        match self {
            Permission::BookView => "view",
            Permission::BookCreate => "create",
            Permission::BookEdit => "edit",
            Permission::BookDelete => "delete",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codename())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.codename() == s)
            .ok_or_else(|| format!("unknown permission '{s}'"))
    }
}

/// Permission sets attached to each group on first creation.
pub fn group_definitions() -> [(&'static str, &'static [Permission]); 3] {
    const VIEWERS: &[Permission] = &[Permission::BookView];
    const EDITORS: &[Permission] = &[
        Permission::BookView,
        Permission::BookCreate,
        Permission::BookEdit,
    ];
    const ADMINS: &[Permission] = &Permission::ALL;

    [
        (VIEWERS_GROUP, VIEWERS),
        (EDITORS_GROUP, EDITORS),
        (ADMINS_GROUP, ADMINS),
    ]
}

/// Effective permissions: direct grants plus everything granted by any group.
pub fn effective_permissions(direct: &[Permission], groups: &[Group]) -> BTreeSet<Permission> {
    direct
        .iter()
        .copied()
        .chain(groups.iter().flat_map(|g| g.permissions.iter().copied()))
        .collect()
}

// Role predicates. A user without a role is none of the three.

pub fn is_admin(role: Option<Role>) -> bool {
    role == Some(Role::Admin)
}

pub fn is_librarian(role: Option<Role>) -> bool {
    role == Some(Role::Librarian)
}

pub fn is_member(role: Option<Role>) -> bool {
    role == Some(Role::Member)
}

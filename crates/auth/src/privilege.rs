use serde::{Deserialize, Serialize};

/// Coarse-grained authority of a user, independent of any specific permission.
///
/// The ordering is meaningful: `None < Editor < Admin < GlobalAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeLevel {
    #[default]
    None,
    Editor,
    Admin,
    GlobalAdmin,
}

impl PrivilegeLevel {
    pub const ALL: [PrivilegeLevel; 4] = [
        PrivilegeLevel::None,
        PrivilegeLevel::Editor,
        PrivilegeLevel::Admin,
        PrivilegeLevel::GlobalAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PrivilegeLevel::None => "none",
            PrivilegeLevel::Editor => "editor",
            PrivilegeLevel::Admin => "admin",
            PrivilegeLevel::GlobalAdmin => "global_admin",
        }
    }

    /// `Admin` or `GlobalAdmin`.
    pub fn is_admin_or_above(self) -> bool {
        self >= PrivilegeLevel::Admin
    }
}

impl core::fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

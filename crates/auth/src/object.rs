//! Per-object authorization dispatch.

use serde::{Deserialize, Serialize};

use crate::decision::{AuthError, Decision};
use crate::store::RoleInfo;
use crate::user::User;
use crate::user_rules::{authorize_delete_user_info, authorize_set_user_info};

pub const USERS_RESOURCE: &str = "cms.users";
pub const ROLES_RESOURCE: &str = "cms.roles";

/// Operation requested on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Create,
    Modify,
    Delete,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Create => "create",
            Permission::Modify => "modify",
            Permission::Delete => "delete",
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource-permission check, the fallback of every object rule.
pub trait ResourceAuthorizer {
    fn authorize_resource(
        &self,
        user: &User,
        resource_name: &str,
        permission_name: &str,
        site_name: Option<&str>,
    ) -> Result<Decision, AuthError>;
}

/// An object that decides who may read or change it.
pub trait SecuredObject {
    fn object_type(&self) -> &'static str;

    fn authorize(
        &self,
        authorizer: &dyn ResourceAuthorizer,
        acting: &User,
        permission: Permission,
        site_name: Option<&str>,
    ) -> Result<Decision, AuthError>;
}

impl SecuredObject for User {
    fn object_type(&self) -> &'static str {
        "user"
    }

    fn authorize(
        &self,
        authorizer: &dyn ResourceAuthorizer,
        acting: &User,
        permission: Permission,
        site_name: Option<&str>,
    ) -> Result<Decision, AuthError> {
        match permission {
            Permission::Read => {
                authorizer.authorize_resource(acting, USERS_RESOURCE, "read", site_name)
            }
            Permission::Create => {
                authorize_set_user_info(authorizer, acting, self, true, site_name)
            }
            Permission::Modify => {
                authorize_set_user_info(authorizer, acting, self, false, site_name)
            }
            Permission::Delete => authorize_delete_user_info(authorizer, acting, self, site_name),
        }
    }
}

impl SecuredObject for RoleInfo {
    fn object_type(&self) -> &'static str {
        "role"
    }

    fn authorize(
        &self,
        authorizer: &dyn ResourceAuthorizer,
        acting: &User,
        permission: Permission,
        site_name: Option<&str>,
    ) -> Result<Decision, AuthError> {
        let permission_name = match permission {
            Permission::Read => "read",
            Permission::Create | Permission::Modify | Permission::Delete => "modify",
        };
        authorizer.authorize_resource(acting, ROLES_RESOURCE, permission_name, site_name)
    }
}

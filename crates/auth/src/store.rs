//! Persistence ports consumed by the authorization core.
//!
//! The core never talks to a database directly. It reads tabular rows through
//! [`MembershipStore`] and [`RoleRequirements`], and writes role/site bindings
//! back through the same port during reconciliation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sitegate_core::{Entity, MembershipId, RoleId, SiteId, UserId};

use crate::user::User;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A site the user is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSiteRow {
    pub site_id: SiteId,
    pub site_name: String,
}

/// A role visible to the user, either bound directly or through a membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleRow {
    pub role_name: String,
    pub role_id: RoleId,
    /// `None` for global roles.
    pub site_id: Option<SiteId>,
    /// `None` means the grant never expires.
    pub valid_to: Option<DateTime<Utc>>,
    /// Set when the role is granted through a membership.
    pub membership_id: Option<MembershipId>,
}

/// A membership the user holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMembershipRow {
    pub membership_name: String,
    pub membership_id: MembershipId,
    pub site_id: Option<SiteId>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// A UI element granted to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UIElementGrantRow {
    pub role_id: RoleId,
    pub resource_name: String,
    pub element_name: String,
    /// Site of the granting role; `None` for global roles.
    pub site_name: Option<String>,
}

/// A culture the user may edit content in on a given site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCultureRow {
    pub site_id: SiteId,
    pub culture_code: String,
}

/// Filters for [`MembershipStore::fetch_user_roles`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleQuery {
    pub include_global: bool,
    pub include_membership: bool,
    /// When set, rows already expired at this instant are omitted.
    pub valid_at: Option<DateTime<Utc>>,
}

impl RoleQuery {
    /// Everything, expired rows included.
    pub fn all() -> Self {
        Self {
            include_global: true,
            include_membership: true,
            valid_at: None,
        }
    }

    /// Directly bound site roles only.
    pub fn direct_site_roles() -> Self {
        Self {
            include_global: false,
            include_membership: false,
            valid_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub id: SiteId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
    pub display_name: String,
    pub site_id: Option<SiteId>,
    /// Created by (and owned by) an external identity provider.
    pub is_domain: bool,
}

impl Entity for RoleInfo {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }

    fn code_name(&self) -> &str {
        &self.name
    }
}

/// Input for [`MembershipStore::create_role`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub display_name: String,
    pub site_id: Option<SiteId>,
    pub is_domain: bool,
}

/// Relational store of sites, roles, memberships and their bindings to users.
pub trait MembershipStore: Send + Sync {
    fn fetch_user_sites(&self, user_id: UserId) -> Result<Vec<UserSiteRow>, StoreError>;

    fn fetch_user_roles(
        &self,
        user_id: UserId,
        query: RoleQuery,
    ) -> Result<Vec<UserRoleRow>, StoreError>;

    fn fetch_user_memberships(
        &self,
        user_id: UserId,
    ) -> Result<Vec<UserMembershipRow>, StoreError>;

    fn fetch_user_cultures(&self, user_id: UserId) -> Result<Vec<UserCultureRow>, StoreError>;

    fn fetch_ui_element_grants(
        &self,
        role_ids: &[RoleId],
    ) -> Result<Vec<UIElementGrantRow>, StoreError>;

    fn lookup_site(&self, site_name: &str) -> Result<Option<SiteInfo>, StoreError>;

    fn lookup_role(
        &self,
        role_name: &str,
        site_id: Option<SiteId>,
    ) -> Result<Option<RoleInfo>, StoreError>;

    fn create_role(&self, role: NewRole) -> Result<RoleInfo, StoreError>;

    fn bind_user_to_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        valid_to: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    fn unbind_user_from_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError>;

    fn bind_user_to_site(&self, user_id: UserId, site_id: SiteId) -> Result<(), StoreError>;

    fn unbind_user_from_site(&self, user_id: UserId, site_id: SiteId) -> Result<(), StoreError>;
}

/// Which roles a resource permission is granted to.
pub trait RoleRequirements: Send + Sync {
    /// `Ok(None)` when the resource/permission pair is not registered at all.
    fn required_roles(
        &self,
        resource_name: &str,
        permission_name: &str,
    ) -> Result<Option<HashSet<RoleId>>, StoreError>;
}

/// CRUD for user accounts.
pub trait UserPersistence: Send + Sync {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    fn find_user(&self, user_name: &str) -> Result<Option<User>, StoreError>;

    /// Insert (unsaved ID) or update; returns the persisted ID.
    fn save_user(&self, user: &User) -> Result<UserId, StoreError>;

    fn delete_user(&self, user_id: UserId) -> Result<(), StoreError>;
}

impl<S> MembershipStore for Arc<S>
where
    S: MembershipStore + ?Sized,
{
    fn fetch_user_sites(&self, user_id: UserId) -> Result<Vec<UserSiteRow>, StoreError> {
        (**self).fetch_user_sites(user_id)
    }

    fn fetch_user_roles(
        &self,
        user_id: UserId,
        query: RoleQuery,
    ) -> Result<Vec<UserRoleRow>, StoreError> {
        (**self).fetch_user_roles(user_id, query)
    }

    fn fetch_user_memberships(
        &self,
        user_id: UserId,
    ) -> Result<Vec<UserMembershipRow>, StoreError> {
        (**self).fetch_user_memberships(user_id)
    }

    fn fetch_user_cultures(&self, user_id: UserId) -> Result<Vec<UserCultureRow>, StoreError> {
        (**self).fetch_user_cultures(user_id)
    }

    fn fetch_ui_element_grants(
        &self,
        role_ids: &[RoleId],
    ) -> Result<Vec<UIElementGrantRow>, StoreError> {
        (**self).fetch_ui_element_grants(role_ids)
    }

    fn lookup_site(&self, site_name: &str) -> Result<Option<SiteInfo>, StoreError> {
        (**self).lookup_site(site_name)
    }

    fn lookup_role(
        &self,
        role_name: &str,
        site_id: Option<SiteId>,
    ) -> Result<Option<RoleInfo>, StoreError> {
        (**self).lookup_role(role_name, site_id)
    }

    fn create_role(&self, role: NewRole) -> Result<RoleInfo, StoreError> {
        (**self).create_role(role)
    }

    fn bind_user_to_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        valid_to: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        (**self).bind_user_to_role(user_id, role_id, valid_to)
    }

    fn unbind_user_from_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        (**self).unbind_user_from_role(user_id, role_id)
    }

    fn bind_user_to_site(&self, user_id: UserId, site_id: SiteId) -> Result<(), StoreError> {
        (**self).bind_user_to_site(user_id, site_id)
    }

    fn unbind_user_from_site(&self, user_id: UserId, site_id: SiteId) -> Result<(), StoreError> {
        (**self).unbind_user_from_site(user_id, site_id)
    }
}

impl<R> RoleRequirements for Arc<R>
where
    R: RoleRequirements + ?Sized,
{
    fn required_roles(
        &self,
        resource_name: &str,
        permission_name: &str,
    ) -> Result<Option<HashSet<RoleId>>, StoreError> {
        (**self).required_roles(resource_name, permission_name)
    }
}

impl<P> UserPersistence for Arc<P>
where
    P: UserPersistence + ?Sized,
{
    fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        (**self).get_user(user_id)
    }

    fn find_user(&self, user_name: &str) -> Result<Option<User>, StoreError> {
        (**self).find_user(user_name)
    }

    fn save_user(&self, user: &User) -> Result<UserId, StoreError> {
        (**self).save_user(user)
    }

    fn delete_user(&self, user_id: UserId) -> Result<(), StoreError> {
        (**self).delete_user(user_id)
    }
}

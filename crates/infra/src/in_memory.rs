//! In-memory membership store.
//!
//! Intended for tests/dev. Every mutation through the store ports is also
//! appended to a journal so callers can assert on exactly what was written.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use sitegate_auth::collections::normalize;
use sitegate_auth::{
    MembershipStore, NewRole, RoleInfo, RoleQuery, RoleRequirements, SiteInfo, StoreError,
    UIElementGrantRow, User, UserCultureRow, UserMembershipRow, UserPersistence, UserRoleRow,
    UserSiteRow,
};
use sitegate_core::{MembershipId, RoleId, SiteId, UserId};

/// A write issued through [`MembershipStore`] or [`UserPersistence`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StoreMutation {
    CreateRole { role_id: RoleId, name: String, site_id: Option<SiteId>, is_domain: bool },
    BindRole { user_id: UserId, role_id: RoleId },
    UnbindRole { user_id: UserId, role_id: RoleId },
    BindSite { user_id: UserId, site_id: SiteId },
    UnbindSite { user_id: UserId, site_id: SiteId },
    SaveUser { user_id: UserId },
    DeleteUser { user_id: UserId },
}

#[derive(Debug, Clone)]
struct MembershipRecord {
    name: String,
    site_id: Option<SiteId>,
    roles: BTreeSet<RoleId>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i32,
    sites: BTreeMap<SiteId, SiteInfo>,
    roles: BTreeMap<RoleId, RoleInfo>,
    memberships: BTreeMap<MembershipId, MembershipRecord>,
    user_roles: BTreeMap<(UserId, RoleId), Option<DateTime<Utc>>>,
    user_memberships: BTreeMap<(UserId, MembershipId), Option<DateTime<Utc>>>,
    user_sites: BTreeSet<(UserId, SiteId)>,
    user_cultures: BTreeSet<(UserId, SiteId, String)>,
    ui_elements: Vec<(RoleId, String, String)>,
    permissions: HashMap<(String, String), HashSet<RoleId>>,
    users: BTreeMap<UserId, User>,
    journal: Vec<StoreMutation>,
    role_fetches: usize,
}

impl State {
    fn allocate(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn site_name(&self, site_id: Option<SiteId>) -> Option<String> {
        site_id.and_then(|id| self.sites.get(&id)).map(|s| s.name.clone())
    }

    fn find_role(&self, role_name: &str, site_id: Option<SiteId>) -> Option<&RoleInfo> {
        let name = normalize(role_name);
        self.roles
            .values()
            .find(|r| r.site_id == site_id && normalize(&r.name) == name)
    }

    fn insert_role(&mut self, role: NewRole) -> RoleInfo {
        let id = RoleId::new(self.allocate());
        let info = RoleInfo {
            id,
            name: role.name,
            display_name: role.display_name,
            site_id: role.site_id,
            is_domain: role.is_domain,
        };
        self.roles.insert(id, info.clone());
        info
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMembershipStore {
    state: RwLock<State>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    fn seed(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn inspect(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_site(&self, name: &str) -> SiteId {
        let mut state = self.seed();
        let id = SiteId::new(state.allocate());
        state.sites.insert(id, SiteInfo { id, name: name.to_string() });
        id
    }

    /// A locally managed role. `site_id = None` creates a global role.
    pub fn add_role(&self, name: &str, site_id: Option<SiteId>) -> RoleId {
        self.insert_role(name, site_id, false)
    }

    /// A role owned by an external identity provider.
    pub fn add_domain_role(&self, name: &str, site_id: Option<SiteId>) -> RoleId {
        self.insert_role(name, site_id, true)
    }

    fn insert_role(&self, name: &str, site_id: Option<SiteId>, is_domain: bool) -> RoleId {
        self.seed()
            .insert_role(NewRole {
                name: name.to_string(),
                display_name: name.to_string(),
                site_id,
                is_domain,
            })
            .id
    }

    pub fn add_membership(&self, name: &str, site_id: Option<SiteId>) -> MembershipId {
        let mut state = self.seed();
        let id = MembershipId::new(state.allocate());
        state.memberships.insert(
            id,
            MembershipRecord {
                name: name.to_string(),
                site_id,
                roles: BTreeSet::new(),
            },
        );
        id
    }

    pub fn add_role_to_membership(&self, membership_id: MembershipId, role_id: RoleId) {
        if let Some(m) = self.seed().memberships.get_mut(&membership_id) {
            m.roles.insert(role_id);
        }
    }

    pub fn assign_role(&self, user_id: UserId, role_id: RoleId, valid_to: Option<DateTime<Utc>>) {
        self.seed().user_roles.insert((user_id, role_id), valid_to);
    }

    pub fn assign_membership(
        &self,
        user_id: UserId,
        membership_id: MembershipId,
        valid_to: Option<DateTime<Utc>>,
    ) {
        self.seed()
            .user_memberships
            .insert((user_id, membership_id), valid_to);
    }

    pub fn assign_site(&self, user_id: UserId, site_id: SiteId) {
        self.seed().user_sites.insert((user_id, site_id));
    }

    pub fn allow_culture(&self, user_id: UserId, site_id: SiteId, culture_code: &str) {
        self.seed()
            .user_cultures
            .insert((user_id, site_id, culture_code.to_string()));
    }

    pub fn grant_ui_element(&self, role_id: RoleId, resource_name: &str, element_name: &str) {
        self.seed().ui_elements.push((
            role_id,
            resource_name.to_string(),
            element_name.to_string(),
        ));
    }

    /// Register a resource permission with no roles granted yet.
    pub fn register_permission(&self, resource_name: &str, permission_name: &str) {
        self.seed()
            .permissions
            .entry((normalize(resource_name), normalize(permission_name)))
            .or_default();
    }

    pub fn grant_permission(&self, resource_name: &str, permission_name: &str, role_id: RoleId) {
        self.seed()
            .permissions
            .entry((normalize(resource_name), normalize(permission_name)))
            .or_default()
            .insert(role_id);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn journal(&self) -> Vec<StoreMutation> {
        self.inspect().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.seed().journal.clear();
    }

    /// How many times role rows were fetched (one per snapshot build).
    pub fn role_fetches(&self) -> usize {
        self.inspect().role_fetches
    }

    pub fn roles_named(&self, name: &str, site_id: Option<SiteId>) -> Vec<RoleInfo> {
        let name = normalize(name);
        self.inspect()
            .roles
            .values()
            .filter(|r| r.site_id == site_id && normalize(&r.name) == name)
            .cloned()
            .collect()
    }

    pub fn is_bound_to_role(&self, user_id: UserId, role_id: RoleId) -> bool {
        self.inspect().user_roles.contains_key(&(user_id, role_id))
    }

    pub fn is_bound_to_site(&self, user_id: UserId, site_id: SiteId) -> bool {
        self.inspect().user_sites.contains(&(user_id, site_id))
    }
}

impl MembershipStore for InMemoryMembershipStore {
    fn fetch_user_sites(&self, user_id: UserId) -> Result<Vec<UserSiteRow>, StoreError> {
        let state = self.read()?;
        Ok(state
            .user_sites
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, site_id)| state.sites.get(site_id))
            .map(|site| UserSiteRow {
                site_id: site.id,
                site_name: site.name.clone(),
            })
            .collect())
    }

    fn fetch_user_roles(
        &self,
        user_id: UserId,
        query: RoleQuery,
    ) -> Result<Vec<UserRoleRow>, StoreError> {
        let mut state = self.write()?;
        state.role_fetches += 1;

        let visible = |role: &RoleInfo, valid_to: Option<DateTime<Utc>>| {
            let scope_ok = query.include_global || role.site_id.is_some();
            let time_ok = match (query.valid_at, valid_to) {
                (Some(at), Some(to)) => to > at,
                _ => true,
            };
            scope_ok && time_ok
        };

        let mut rows = Vec::new();
        for ((u, role_id), valid_to) in &state.user_roles {
            let Some(role) = state.roles.get(role_id) else {
                continue;
            };
            if *u == user_id && visible(role, *valid_to) {
                rows.push(UserRoleRow {
                    role_name: role.name.clone(),
                    role_id: role.id,
                    site_id: role.site_id,
                    valid_to: *valid_to,
                    membership_id: None,
                });
            }
        }

        if query.include_membership {
            for ((u, membership_id), valid_to) in &state.user_memberships {
                if *u != user_id {
                    continue;
                }
                let Some(membership) = state.memberships.get(membership_id) else {
                    continue;
                };
                for role in membership.roles.iter().filter_map(|id| state.roles.get(id)) {
                    if visible(role, *valid_to) {
                        rows.push(UserRoleRow {
                            role_name: role.name.clone(),
                            role_id: role.id,
                            site_id: role.site_id,
                            valid_to: *valid_to,
                            membership_id: Some(*membership_id),
                        });
                    }
                }
            }
        }

        Ok(rows)
    }

    fn fetch_user_memberships(
        &self,
        user_id: UserId,
    ) -> Result<Vec<UserMembershipRow>, StoreError> {
        let state = self.read()?;
        Ok(state
            .user_memberships
            .iter()
            .filter(|((u, _), _)| *u == user_id)
            .filter_map(|((_, id), valid_to)| {
                state.memberships.get(id).map(|m| UserMembershipRow {
                    membership_name: m.name.clone(),
                    membership_id: *id,
                    site_id: m.site_id,
                    valid_to: *valid_to,
                })
            })
            .collect())
    }

    fn fetch_user_cultures(&self, user_id: UserId) -> Result<Vec<UserCultureRow>, StoreError> {
        let state = self.read()?;
        Ok(state
            .user_cultures
            .iter()
            .filter(|(u, _, _)| *u == user_id)
            .map(|(_, site_id, code)| UserCultureRow {
                site_id: *site_id,
                culture_code: code.clone(),
            })
            .collect())
    }

    fn fetch_ui_element_grants(
        &self,
        role_ids: &[RoleId],
    ) -> Result<Vec<UIElementGrantRow>, StoreError> {
        let state = self.read()?;
        Ok(state
            .ui_elements
            .iter()
            .filter(|(role_id, _, _)| role_ids.contains(role_id))
            .filter_map(|(role_id, resource, element)| {
                state.roles.get(role_id).map(|role| UIElementGrantRow {
                    role_id: *role_id,
                    resource_name: resource.clone(),
                    element_name: element.clone(),
                    site_name: state.site_name(role.site_id),
                })
            })
            .collect())
    }

    fn lookup_site(&self, site_name: &str) -> Result<Option<SiteInfo>, StoreError> {
        let name = normalize(site_name);
        Ok(self
            .read()?
            .sites
            .values()
            .find(|s| normalize(&s.name) == name)
            .cloned())
    }

    fn lookup_role(
        &self,
        role_name: &str,
        site_id: Option<SiteId>,
    ) -> Result<Option<RoleInfo>, StoreError> {
        Ok(self.read()?.find_role(role_name, site_id).cloned())
    }

    fn create_role(&self, role: NewRole) -> Result<RoleInfo, StoreError> {
        let mut state = self.write()?;
        if state.find_role(&role.name, role.site_id).is_some() {
            return Err(StoreError::Conflict(format!("role '{}' already exists", role.name)));
        }
        let info = state.insert_role(role);
        state.journal.push(StoreMutation::CreateRole {
            role_id: info.id,
            name: info.name.clone(),
            site_id: info.site_id,
            is_domain: info.is_domain,
        });
        debug!(role_id = %info.id, name = %info.name, "role inserted");
        Ok(info)
    }

    fn bind_user_to_role(
        &self,
        user_id: UserId,
        role_id: RoleId,
        valid_to: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        state.user_roles.insert((user_id, role_id), valid_to);
        state.journal.push(StoreMutation::BindRole { user_id, role_id });
        Ok(())
    }

    fn unbind_user_from_role(&self, user_id: UserId, role_id: RoleId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.user_roles.remove(&(user_id, role_id));
        state.journal.push(StoreMutation::UnbindRole { user_id, role_id });
        Ok(())
    }

    fn bind_user_to_site(&self, user_id: UserId, site_id: SiteId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.sites.contains_key(&site_id) {
            return Err(StoreError::NotFound(format!("site {site_id}")));
        }
        state.user_sites.insert((user_id, site_id));
        state.journal.push(StoreMutation::BindSite { user_id, site_id });
        Ok(())
    }

    /// Removing a site binding also drops the user's roles on that site.
    fn unbind_user_from_site(&self, user_id: UserId, site_id: SiteId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.user_sites.remove(&(user_id, site_id));
        let site_roles: HashSet<RoleId> = state
            .roles
            .values()
            .filter(|r| r.site_id == Some(site_id))
            .map(|r| r.id)
            .collect();
        state
            .user_roles
            .retain(|(u, role_id), _| *u != user_id || !site_roles.contains(role_id));
        state.journal.push(StoreMutation::UnbindSite { user_id, site_id });
        Ok(())
    }
}

impl RoleRequirements for InMemoryMembershipStore {
    fn required_roles(
        &self,
        resource_name: &str,
        permission_name: &str,
    ) -> Result<Option<HashSet<RoleId>>, StoreError> {
        let key = (normalize(resource_name), normalize(permission_name));
        Ok(self.read()?.permissions.get(&key).cloned())
    }
}

impl UserPersistence for InMemoryMembershipStore {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    fn find_user(&self, user_name: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.name.eq_ignore_ascii_case(user_name))
            .cloned())
    }

    fn save_user(&self, user: &User) -> Result<UserId, StoreError> {
        let mut state = self.write()?;
        let taken = state
            .users
            .values()
            .any(|u| u.id != user.id && u.name.eq_ignore_ascii_case(&user.name));
        if taken {
            return Err(StoreError::Conflict(format!("user name '{}' is taken", user.name)));
        }

        let user_id = if user.id.is_saved() {
            if !state.users.contains_key(&user.id) {
                return Err(StoreError::NotFound(format!("user {}", user.id)));
            }
            user.id
        } else {
            UserId::new(state.allocate())
        };

        let mut stored = user.clone();
        stored.id = user_id;
        stored.mark_persisted();
        state.users.insert(user_id, stored);
        state.journal.push(StoreMutation::SaveUser { user_id });
        Ok(user_id)
    }

    fn delete_user(&self, user_id: UserId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.users.remove(&user_id).is_none() {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        state.user_roles.retain(|(u, _), _| *u != user_id);
        state.user_memberships.retain(|(u, _), _| *u != user_id);
        state.user_sites.retain(|(u, _)| *u != user_id);
        state.user_cultures.retain(|(u, _, _)| *u != user_id);
        state.journal.push(StoreMutation::DeleteUser { user_id });
        Ok(())
    }
}

//! Per-user security snapshot.
//!
//! A [`SecurityCollections`] value holds everything an access check needs to
//! know about one user: the sites they belong to, the roles and memberships
//! they hold per site (plus a global bucket), the validity windows of those
//! grants, their UI-element grants and their allowed cultures.
//!
//! The snapshot is immutable once built. Expired entries are never removed in
//! place; the lookup functions report [`GrantState::Expired`] and callers
//! replace the cached snapshot with a copy that lacks the entry (see the
//! `without_*` methods).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sitegate_core::{MembershipId, RoleId, SiteId};

/// Reserved scope key for grants that are not bound to any site.
///
/// Site names are DNS-like, so they can never contain `#`.
pub const GLOBAL_ROLES_KEY: &str = "#global";

/// Lowercased name → identifier.
pub type NameMap<I> = HashMap<String, I>;

/// Scope key (lowercased site name or [`GLOBAL_ROLES_KEY`]) → [`NameMap`].
pub type ScopedMap<I> = HashMap<String, NameMap<I>>;

/// Normalise a role, membership, site or element name for map lookups.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Scope key for an optional site name.
pub fn scope_key(site_name: Option<&str>) -> String {
    match site_name {
        Some(site) if !site.trim().is_empty() => normalize(site),
        _ => GLOBAL_ROLES_KEY.to_string(),
    }
}

/// Key used for UI elements: `"resource.element"`, lowercased.
pub fn element_key(resource_name: &str, element_name: &str) -> String {
    format!("{}.{}", normalize(resource_name), normalize(element_name))
}

/// The validity window of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    /// Never expires.
    Unlimited,
    /// Valid strictly before the given instant.
    Until(DateTime<Utc>),
}

impl Validity {
    /// `None` (no expiry recorded) means unlimited.
    pub fn from_expiry(expiry: Option<DateTime<Utc>>) -> Self {
        match expiry {
            Some(at) => Validity::Until(at),
            None => Validity::Unlimited,
        }
    }

    /// The "zero time" validity: bounded, and already in the past.
    pub fn expired() -> Self {
        Validity::Until(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_unlimited(self) -> bool {
        matches!(self, Validity::Unlimited)
    }

    pub fn is_valid_at(self, now: DateTime<Utc>) -> bool {
        match self {
            Validity::Unlimited => true,
            Validity::Until(at) => now < at,
        }
    }

    /// The broader of the two windows. Unlimited dominates.
    pub fn later(self, other: Validity) -> Validity {
        match (self, other) {
            (Validity::Until(a), Validity::Until(b)) => Validity::Until(a.max(b)),
            _ => Validity::Unlimited,
        }
    }

    /// `true` when `self` lasts strictly longer than `other`.
    pub fn is_broader_than(self, other: Validity) -> bool {
        match (self, other) {
            (Validity::Unlimited, Validity::Until(_)) => true,
            (Validity::Until(a), Validity::Until(b)) => a > b,
            _ => false,
        }
    }
}

/// Outcome of looking a grant up in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    Absent,
    Valid,
    Expired,
}

/// Immutable per-user snapshot of role, membership and UI-element grants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityCollections {
    pub(crate) sites: NameMap<SiteId>,
    pub(crate) sites_roles: ScopedMap<RoleId>,
    pub(crate) membership_roles: ScopedMap<RoleId>,
    pub(crate) memberships: ScopedMap<MembershipId>,
    pub(crate) roles_validity: HashMap<RoleId, DateTime<Utc>>,
    pub(crate) memberships_validity: HashMap<MembershipId, DateTime<Utc>>,
    pub(crate) membership_role_validity: HashMap<RoleId, Validity>,
    pub(crate) ui_elements: HashMap<String, HashMap<String, Validity>>,
    pub(crate) cultures: HashMap<String, HashSet<String>>,
}

impl SecurityCollections {
    /// An empty snapshot (anonymous or unsaved user).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
            && self.sites_roles.values().all(HashMap::is_empty)
            && self.membership_roles.values().all(HashMap::is_empty)
            && self.memberships.values().all(HashMap::is_empty)
    }

    pub fn sites(&self) -> &NameMap<SiteId> {
        &self.sites
    }

    pub fn sites_roles(&self) -> &ScopedMap<RoleId> {
        &self.sites_roles
    }

    pub fn membership_roles(&self) -> &ScopedMap<RoleId> {
        &self.membership_roles
    }

    pub fn memberships(&self) -> &ScopedMap<MembershipId> {
        &self.memberships
    }

    pub fn roles_validity(&self) -> &HashMap<RoleId, DateTime<Utc>> {
        &self.roles_validity
    }

    pub fn memberships_validity(&self) -> &HashMap<MembershipId, DateTime<Utc>> {
        &self.memberships_validity
    }

    pub fn membership_role_validity(&self) -> &HashMap<RoleId, Validity> {
        &self.membership_role_validity
    }

    pub fn ui_elements(&self) -> &HashMap<String, HashMap<String, Validity>> {
        &self.ui_elements
    }

    pub fn is_in_site(&self, site_name: &str) -> bool {
        self.sites.contains_key(&normalize(site_name))
    }

    /// Validity of a directly held role. No entry means unlimited.
    pub fn role_validity(&self, role_id: RoleId) -> Validity {
        Validity::from_expiry(self.roles_validity.get(&role_id).copied())
    }

    /// Validity of a role obtained through memberships. No entry means unlimited.
    pub fn membership_role_validity_of(&self, role_id: RoleId) -> Validity {
        self.membership_role_validity
            .get(&role_id)
            .copied()
            .unwrap_or(Validity::Unlimited)
    }

    pub fn membership_validity(&self, membership_id: MembershipId) -> Validity {
        Validity::from_expiry(self.memberships_validity.get(&membership_id).copied())
    }

    /// `true` when the role appears in any site (or global) role bucket.
    pub fn holds_role_directly(&self, role_id: RoleId) -> bool {
        self.sites_roles
            .values()
            .any(|roles| roles.values().any(|id| *id == role_id))
    }

    pub fn role_state(&self, scope: &str, role_name: &str, now: DateTime<Utc>) -> GrantState {
        lookup(&self.sites_roles, scope, role_name, |id| self.role_validity(id), now)
    }

    pub fn membership_role_state(
        &self,
        scope: &str,
        role_name: &str,
        now: DateTime<Utc>,
    ) -> GrantState {
        lookup(
            &self.membership_roles,
            scope,
            role_name,
            |id| self.membership_role_validity_of(id),
            now,
        )
    }

    pub fn membership_state(
        &self,
        scope: &str,
        membership_name: &str,
        now: DateTime<Utc>,
    ) -> GrantState {
        lookup(
            &self.memberships,
            scope,
            membership_name,
            |id| self.membership_validity(id),
            now,
        )
    }

    pub fn ui_element_state(&self, scope: &str, key: &str, now: DateTime<Utc>) -> GrantState {
        match self.ui_elements.get(scope).and_then(|m| m.get(key)) {
            None => GrantState::Absent,
            Some(v) if v.is_valid_at(now) => GrantState::Valid,
            Some(_) => GrantState::Expired,
        }
    }

    pub fn culture_allowed(&self, site_name: &str, culture_code: &str) -> bool {
        self.cultures
            .get(&normalize(site_name))
            .is_some_and(|codes| codes.contains(&normalize(culture_code)))
    }

    /// Roles (direct and membership-derived) that are valid at `now` in the
    /// given site scope and the global scope.
    pub fn valid_role_ids(&self, site_name: Option<&str>, now: DateTime<Utc>) -> HashSet<RoleId> {
        let mut scopes = vec![GLOBAL_ROLES_KEY.to_string()];
        if site_name.is_some() {
            scopes.push(scope_key(site_name));
        }

        let mut held = HashSet::new();
        for scope in &scopes {
            if let Some(roles) = self.sites_roles.get(scope) {
                held.extend(
                    roles
                        .values()
                        .copied()
                        .filter(|id| self.role_validity(*id).is_valid_at(now)),
                );
            }
            if let Some(roles) = self.membership_roles.get(scope) {
                held.extend(
                    roles
                        .values()
                        .copied()
                        .filter(|id| self.membership_role_validity_of(*id).is_valid_at(now)),
                );
            }
        }
        held
    }

    /// Every role ID the snapshot knows about, direct or membership-derived.
    pub fn all_role_ids(&self) -> Vec<RoleId> {
        let mut ids: Vec<RoleId> = self
            .sites_roles
            .values()
            .chain(self.membership_roles.values())
            .flat_map(|roles| roles.values().copied())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// A copy without the given directly held role, or `None` if absent.
    pub fn without_role(&self, scope: &str, role_name: &str) -> Option<Self> {
        without(self, scope, role_name, |c| &mut c.sites_roles)
    }

    pub fn without_membership_role(&self, scope: &str, role_name: &str) -> Option<Self> {
        without(self, scope, role_name, |c| &mut c.membership_roles)
    }

    pub fn without_membership(&self, scope: &str, membership_name: &str) -> Option<Self> {
        without(self, scope, membership_name, |c| &mut c.memberships)
    }
}

fn lookup<I: Copy>(
    map: &ScopedMap<I>,
    scope: &str,
    name: &str,
    validity: impl Fn(I) -> Validity,
    now: DateTime<Utc>,
) -> GrantState {
    match map.get(scope).and_then(|names| names.get(&normalize(name))) {
        None => GrantState::Absent,
        Some(id) if validity(*id).is_valid_at(now) => GrantState::Valid,
        Some(_) => GrantState::Expired,
    }
}

fn without<I>(
    collections: &SecurityCollections,
    scope: &str,
    name: &str,
    select: impl Fn(&mut SecurityCollections) -> &mut ScopedMap<I>,
) -> Option<SecurityCollections> {
    let key = normalize(name);
    let mut copy = collections.clone();
    let removed = select(&mut copy)
        .get_mut(scope)
        .and_then(|names| names.remove(&key));
    removed.map(|_| copy)
}

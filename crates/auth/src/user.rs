//! User entity and its lazily built security snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sitegate_core::{Entity, UserId};

use crate::PrivilegeLevel;
use crate::collections::{GLOBAL_ROLES_KEY, SecurityCollections, normalize};

/// Name of the anonymous account used for unauthenticated requests.
pub const PUBLIC_USER_NAME: &str = "public";

/// Values of a user as last loaded from (or saved to) the store.
///
/// Authorization of a save compares the edited values against these, which
/// is what makes "did the privilege level change?" and "is this still the same
/// account?" answerable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub privilege_level: PrivilegeLevel,
}

/// A user account.
///
/// # Invariants
/// - The security snapshot is owned by this instance only; clones start empty.
/// - The snapshot is built at most once per invalidation, even under
///   concurrent access to the same instance.
#[derive(Debug)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub guid: Uuid,
    pub privilege_level: PrivilegeLevel,
    pub enabled: bool,
    /// Account is managed by an external identity provider.
    pub is_external: bool,
    /// Account comes from a Windows/AD domain.
    pub is_domain: bool,
    /// When `false` the user may work in every culture.
    pub has_allowed_cultures: bool,
    /// Desired site → role-name assignment, reconciled by
    /// [`Reconciler`](crate::reconcile::Reconciler).
    pub site_roles: BTreeMap<String, BTreeSet<String>>,
    original: Option<UserSnapshot>,
    security: SecurityCell,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            guid: Uuid::now_v7(),
            privilege_level: PrivilegeLevel::None,
            enabled: true,
            is_external: false,
            is_domain: false,
            has_allowed_cultures: false,
            site_roles: BTreeMap::new(),
            original: None,
            security: SecurityCell::default(),
        }
    }

    /// A user as loaded from the store: the current values become the original ones.
    pub fn loaded(id: UserId, name: impl Into<String>, privilege_level: PrivilegeLevel) -> Self {
        let mut user = Self::new(id, name).with_privilege_level(privilege_level);
        user.mark_persisted();
        user
    }

    pub fn with_privilege_level(mut self, level: PrivilegeLevel) -> Self {
        self.privilege_level = level;
        self
    }

    pub fn is_public(&self) -> bool {
        self.name.eq_ignore_ascii_case(PUBLIC_USER_NAME)
    }

    pub fn original(&self) -> Option<UserSnapshot> {
        self.original
    }

    pub fn original_id(&self) -> Option<UserId> {
        self.original.map(|o| o.id)
    }

    /// Original privilege level; a never-saved user starts at `None`.
    pub fn original_privilege_level(&self) -> PrivilegeLevel {
        self.original
            .map(|o| o.privilege_level)
            .unwrap_or(PrivilegeLevel::None)
    }

    pub fn privilege_level_changed(&self) -> bool {
        self.privilege_level != self.original_privilege_level()
    }

    /// Admin or above now, or before the pending change.
    pub fn is_or_was_admin(&self) -> bool {
        self.privilege_level.is_admin_or_above()
            || self.original_privilege_level().is_admin_or_above()
    }

    /// Record the current values as the persisted ones.
    pub fn mark_persisted(&mut self) {
        self.original = Some(UserSnapshot {
            id: self.id,
            privilege_level: self.privilege_level,
        });
    }

    /// Claim a role on a site (lowercased site key). Global scope is ignored.
    pub fn assign_site_role(&mut self, site_name: &str, role_name: impl Into<String>) {
        let site = normalize(site_name);
        if site == GLOBAL_ROLES_KEY {
            return;
        }
        self.site_roles.entry(site).or_default().insert(role_name.into());
    }

    /// Claim membership of a site without any roles.
    pub fn assign_site(&mut self, site_name: &str) {
        let site = normalize(site_name);
        if site != GLOBAL_ROLES_KEY {
            self.site_roles.entry(site).or_default();
        }
    }

    pub fn remove_site(&mut self, site_name: &str) {
        self.site_roles.remove(&normalize(site_name));
    }

    /// The cached snapshot, building it with `load` on first access.
    pub fn security_collections<E>(
        &self,
        load: impl FnOnce(UserId) -> Result<SecurityCollections, E>,
    ) -> Result<Arc<SecurityCollections>, E> {
        self.security.get_or_try_init(|| load(self.id))
    }

    /// The cached snapshot if it has been built.
    pub fn cached_security_collections(&self) -> Option<Arc<SecurityCollections>> {
        self.security.current()
    }

    /// Drop the cached snapshot; the next access rebuilds it.
    pub fn invalidate_security_collections(&self) {
        self.security.invalidate();
    }

    /// Replace the cached snapshot with `evict(current)` when it returns a copy.
    pub(crate) fn evict_security(
        &self,
        evict: impl FnOnce(&SecurityCollections) -> Option<SecurityCollections>,
    ) {
        self.security.replace_with(evict);
    }
}

impl Clone for User {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            guid: self.guid,
            privilege_level: self.privilege_level,
            enabled: self.enabled,
            is_external: self.is_external,
            is_domain: self.is_domain,
            has_allowed_cultures: self.has_allowed_cultures,
            site_roles: self.site_roles.clone(),
            original: self.original,
            security: SecurityCell::default(),
        }
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }

    fn code_name(&self) -> &str {
        &self.name
    }
}

/// Double-checked lazy holder of a user's snapshot.
#[derive(Debug, Default)]
struct SecurityCell {
    build_lock: Mutex<()>,
    snapshot: RwLock<Option<Arc<SecurityCollections>>>,
}

impl SecurityCell {
    fn current(&self) -> Option<Arc<SecurityCollections>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn get_or_try_init<E>(
        &self,
        init: impl FnOnce() -> Result<SecurityCollections, E>,
    ) -> Result<Arc<SecurityCollections>, E> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let built = Arc::new(init()?);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&built));
        Ok(built)
    }

    fn invalidate(&self) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn replace_with(&self, f: impl FnOnce(&SecurityCollections) -> Option<SecurityCollections>) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let next = guard.as_deref().and_then(f);
        if let Some(next) = next {
            *guard = Some(Arc::new(next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn snapshot_is_built_once_across_threads() {
        let user = Arc::new(User::loaded(UserId::new(7), "alice", PrivilegeLevel::Editor));
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let user = Arc::clone(&user);
                let builds = Arc::clone(&builds);
                thread::spawn(move || {
                    user.security_collections(|_| {
                        builds.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ()>(SecurityCollections::empty())
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidation_forces_rebuild() {
        let user = User::loaded(UserId::new(7), "alice", PrivilegeLevel::None);
        let mut builds = 0;
        user.security_collections(|_| {
            builds += 1;
            Ok::<_, ()>(SecurityCollections::empty())
        })
        .unwrap();
        user.invalidate_security_collections();
        assert!(user.cached_security_collections().is_none());
        user.security_collections(|_| {
            builds += 1;
            Ok::<_, ()>(SecurityCollections::empty())
        })
        .unwrap();
        assert_eq!(builds, 2);
    }

    #[test]
    fn failed_build_leaves_cache_empty() {
        let user = User::loaded(UserId::new(7), "alice", PrivilegeLevel::None);
        let result = user.security_collections(|_| Err::<SecurityCollections, _>("store down"));
        assert_eq!(result.unwrap_err(), "store down");
        assert!(user.cached_security_collections().is_none());
    }

    #[test]
    fn clones_do_not_share_snapshot() {
        let user = User::loaded(UserId::new(7), "alice", PrivilegeLevel::None);
        user.security_collections(|_| Ok::<_, ()>(SecurityCollections::empty()))
            .unwrap();
        let copy = user.clone();
        assert!(copy.cached_security_collections().is_none());
        assert_eq!(copy.original_id(), Some(UserId::new(7)));
    }

    #[test]
    fn privilege_change_is_tracked_against_original() {
        let mut user = User::loaded(UserId::new(3), "bob", PrivilegeLevel::Admin);
        assert!(!user.privilege_level_changed());
        assert!(user.is_or_was_admin());

        user.privilege_level = PrivilegeLevel::None;
        assert!(user.privilege_level_changed());
        assert!(user.is_or_was_admin());

        user.mark_persisted();
        assert!(!user.is_or_was_admin());
    }

    #[test]
    fn new_user_starts_without_original() {
        let user =
            User::new(UserId::unsaved(), "carol").with_privilege_level(PrivilegeLevel::Editor);
        assert_eq!(user.original_id(), None);
        assert!(user.privilege_level_changed());
    }

    #[test]
    fn global_scope_is_never_claimed() {
        let mut user = User::new(UserId::new(1), "dave");
        user.assign_site_role(GLOBAL_ROLES_KEY, "Admins");
        user.assign_site_role("Acme", "Editors");
        assert_eq!(user.site_roles.len(), 1);
        assert!(user.site_roles["acme"].contains("Editors"));
    }

    #[test]
    fn public_account_is_detected() {
        assert!(User::new(UserId::new(65), "Public").is_public());
        assert!(!User::new(UserId::new(66), "publican").is_public());
    }
}

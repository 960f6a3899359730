//! Brings a user's persisted site and role bindings in line with the
//! assignment carried on the [`User`] (`site_roles`).
//!
//! Used by external identity-provider synchronization. Global-scope roles are
//! never touched.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, instrument};

use sitegate_core::{DomainError, Entity, RoleId, SiteId, UserId};

use crate::collections::{GLOBAL_ROLES_KEY, normalize};
use crate::decision::AuthError;
use crate::store::{MembershipStore, NewRole, RoleInfo, RoleQuery, SiteInfo};
use crate::user::User;

/// What a reconciliation changed. Role entries are `(site, role)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub sites_bound: Vec<String>,
    pub sites_unbound: Vec<String>,
    pub roles_bound: Vec<(String, String)>,
    pub roles_unbound: Vec<(String, String)>,
    pub roles_created: Vec<(String, String)>,
    /// Stale bindings kept because the role is not owned by the identity provider.
    pub roles_kept: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.sites_bound.is_empty()
            && self.sites_unbound.is_empty()
            && self.roles_bound.is_empty()
            && self.roles_unbound.is_empty()
    }
}

/// Persisted bindings of one site, keyed by lowercased role name.
#[derive(Debug, Default)]
struct PersistedSite {
    name: String,
    roles: BTreeMap<String, RoleId>,
}

pub struct Reconciler<S> {
    store: S,
    creation_lock: Arc<Mutex<()>>,
}

impl<S> Reconciler<S>
where
    S: MembershipStore,
{
    pub fn new(store: S) -> Self {
        Self::with_creation_lock(store, Arc::new(Mutex::new(())))
    }

    /// Share the role-creation lock with other reconcilers of the same store.
    pub fn with_creation_lock(store: S, creation_lock: Arc<Mutex<()>>) -> Self {
        Self {
            store,
            creation_lock,
        }
    }

    pub fn creation_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.creation_lock)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply the difference between the persisted bindings and `user.site_roles`.
    ///
    /// With `external_sync` set, created roles are flagged as domain roles and
    /// only domain roles are unbound.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn ensure_roles_and_sites(
        &self,
        user: &User,
        external_sync: bool,
    ) -> Result<ReconcileReport, AuthError> {
        if !user.id.is_saved() {
            return Err(DomainError::validation("cannot reconcile an unsaved user").into());
        }

        let persisted = self.persisted_state(user.id)?;
        let desired: BTreeMap<String, BTreeSet<String>> = user
            .site_roles
            .iter()
            .filter(|(site, _)| normalize(site) != GLOBAL_ROLES_KEY)
            .map(|(site, roles)| (normalize(site), roles.iter().map(|r| normalize(r)).collect()))
            .collect();

        // Every claimed site must exist before anything is written.
        let mut targets = Vec::with_capacity(desired.len());
        for (site_name, wanted) in desired {
            let site = self
                .store
                .lookup_site(&site_name)?
                .ok_or_else(|| AuthError::ConfigurationMissing(format!("site '{site_name}'")))?;
            targets.push((site_name, site, wanted));
        }

        let mut report = ReconcileReport::default();
        let applied = self.apply(user.id, &persisted, &targets, external_sync, &mut report);

        if applied.is_err() || !report.is_noop() {
            user.invalidate_security_collections();
        }
        applied?;

        info!(
            sites_bound = report.sites_bound.len(),
            sites_unbound = report.sites_unbound.len(),
            roles_bound = report.roles_bound.len(),
            roles_unbound = report.roles_unbound.len(),
            roles_created = report.roles_created.len(),
            "user roles and sites reconciled"
        );
        Ok(report)
    }

    /// Issue the binding writes, recording each one in `report` as it lands.
    fn apply(
        &self,
        user_id: UserId,
        persisted: &HashMap<SiteId, PersistedSite>,
        targets: &[(String, SiteInfo, BTreeSet<String>)],
        external_sync: bool,
        report: &mut ReconcileReport,
    ) -> Result<(), AuthError> {
        for (site_id, site) in persisted {
            if !targets.iter().any(|(_, target, _)| target.id == *site_id) {
                self.store.unbind_user_from_site(user_id, *site_id)?;
                report.sites_unbound.push(site.name.clone());
            }
        }

        for (site_name, site, wanted) in targets {
            let empty = PersistedSite::default();
            let current = match persisted.get(&site.id) {
                Some(current) => current,
                None => {
                    self.store.bind_user_to_site(user_id, site.id)?;
                    report.sites_bound.push(site_name.clone());
                    &empty
                }
            };

            for (role_name, role_id) in &current.roles {
                if wanted.contains(role_name) {
                    continue;
                }
                if external_sync && !self.is_domain_role(role_name, site.id)? {
                    debug!(site = %site_name, role = %role_name, "keeping locally managed role");
                    report.roles_kept.push((site_name.clone(), role_name.clone()));
                    continue;
                }
                self.store.unbind_user_from_role(user_id, *role_id)?;
                report.roles_unbound.push((site_name.clone(), role_name.clone()));
            }

            for role_name in wanted.iter().filter(|r| !current.roles.contains_key(*r)) {
                let (role, created) = self.find_or_create_role(role_name, site.id, external_sync)?;
                if created {
                    report.roles_created.push((site_name.clone(), role_name.clone()));
                }
                self.store.bind_user_to_role(user_id, role.id, None)?;
                report.roles_bound.push((site_name.clone(), role_name.clone()));
            }
        }
        Ok(())
    }

    /// Site and direct site-role bindings as currently stored.
    fn persisted_state(
        &self,
        user_id: UserId,
    ) -> Result<HashMap<SiteId, PersistedSite>, AuthError> {
        let mut state: HashMap<SiteId, PersistedSite> = self
            .store
            .fetch_user_sites(user_id)?
            .into_iter()
            .map(|row| {
                (
                    row.site_id,
                    PersistedSite {
                        name: row.site_name,
                        roles: BTreeMap::new(),
                    },
                )
            })
            .collect();

        for row in self.store.fetch_user_roles(user_id, RoleQuery::direct_site_roles())? {
            let Some(site_id) = row.site_id else {
                continue;
            };
            if row.membership_id.is_some_and(|m| m.is_saved()) {
                continue;
            }
            if let Some(site) = state.get_mut(&site_id) {
                site.roles.insert(normalize(&row.role_name), row.role_id);
            }
        }
        Ok(state)
    }

    fn is_domain_role(&self, role_name: &str, site_id: SiteId) -> Result<bool, AuthError> {
        Ok(self
            .store
            .lookup_role(role_name, Some(site_id))?
            .is_some_and(|role| role.is_domain))
    }

    /// Look the role up, creating it under the creation lock when missing.
    fn find_or_create_role(
        &self,
        role_name: &str,
        site_id: SiteId,
        external_sync: bool,
    ) -> Result<(RoleInfo, bool), AuthError> {
        if let Some(role) = self.store.lookup_role(role_name, Some(site_id))? {
            return Ok((role, false));
        }

        let _guard = self
            .creation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Another thread may have created it while we waited.
        if let Some(role) = self.store.lookup_role(role_name, Some(site_id))? {
            return Ok((role, false));
        }

        let role = self.store.create_role(NewRole {
            name: role_name.to_string(),
            display_name: role_name.to_string(),
            site_id: Some(site_id),
            is_domain: external_sync,
        })?;
        info!(role = role.code_name(), role_id = %role.id(), site_id = %site_id, "role created");
        Ok((role, true))
    }
}

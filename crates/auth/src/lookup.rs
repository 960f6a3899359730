//! Builds a user's [`SecurityCollections`] from store rows.
//!
//! Memberships are merged before roles: the validity of a membership-derived
//! role is taken from the membership that grants it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use sitegate_core::{MembershipId, RoleId, SiteId, UserId};

use crate::collections::{
    GLOBAL_ROLES_KEY, NameMap, SecurityCollections, Validity, normalize,
};
use crate::settings::LicenseGate;
use crate::store::{MembershipStore, RoleQuery, StoreError, UserMembershipRow, UserRoleRow};
use crate::ui_elements::build_ui_element_map;

/// Loads and assembles security snapshots.
pub struct SecurityCollectionsBuilder<S> {
    store: S,
    license: Arc<dyn LicenseGate>,
}

impl<S> SecurityCollectionsBuilder<S>
where
    S: MembershipStore,
{
    pub fn new(store: S, license: Arc<dyn LicenseGate>) -> Self {
        Self { store, license }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Build the snapshot for `user_id`. Unsaved IDs get an empty snapshot.
    pub fn build_for(&self, user_id: UserId) -> Result<SecurityCollections, StoreError> {
        if !user_id.is_saved() {
            return Ok(SecurityCollections::empty());
        }

        let sites = self.store.fetch_user_sites(user_id)?;
        let memberships_allowed = self.license.memberships_allowed();
        let roles = self.store.fetch_user_roles(
            user_id,
            RoleQuery {
                include_global: true,
                include_membership: memberships_allowed,
                valid_at: None,
            },
        )?;
        let memberships = self.store.fetch_user_memberships(user_id)?;
        let cultures = self.store.fetch_user_cultures(user_id)?;

        let mut scopes: Vec<(String, Option<SiteId>)> = sites
            .iter()
            .map(|s| (normalize(&s.site_name), Some(s.site_id)))
            .collect();
        scopes.push((GLOBAL_ROLES_KEY.to_string(), None));

        let mut collections = SecurityCollections::empty();
        collections.sites = sites
            .iter()
            .map(|s| (normalize(&s.site_name), s.site_id))
            .collect();

        let mut pass = MergePass::default();
        for (scope, site_id) in &scopes {
            let rows = memberships.iter().filter(|m| m.site_id == *site_id);
            pass.merge_memberships(&mut collections, scope, rows);
        }
        for (scope, site_id) in &scopes {
            let rows = roles.iter().filter(|r| r.site_id == *site_id);
            if memberships_allowed {
                pass.merge_roles(&mut collections, scope, rows);
            } else {
                pass.merge_roles(
                    &mut collections,
                    scope,
                    rows.filter(|r| !is_membership_row(r)),
                );
            }
        }

        for culture in &cultures {
            if let Some(site) = sites.iter().find(|s| s.site_id == culture.site_id) {
                collections
                    .cultures
                    .entry(normalize(&site.site_name))
                    .or_default()
                    .insert(normalize(&culture.culture_code));
            }
        }

        let role_ids = collections.all_role_ids();
        if !role_ids.is_empty() {
            let grants = self.store.fetch_ui_element_grants(&role_ids)?;
            collections.ui_elements = build_ui_element_map(&collections, &grants);
        }

        debug!(
            user_id = %user_id,
            sites = collections.sites.len(),
            roles = role_ids.len(),
            "security collections built"
        );
        Ok(collections)
    }
}

fn is_membership_row(row: &UserRoleRow) -> bool {
    row.membership_id.is_some_and(|m| m.is_saved())
}

/// State that lives for one build: which IDs have an unlimited grant.
#[derive(Debug, Default)]
pub(crate) struct MergePass {
    unlimited_roles: HashSet<RoleId>,
    unlimited_memberships: HashSet<MembershipId>,
}

impl MergePass {
    pub(crate) fn merge_memberships<'a>(
        &mut self,
        collections: &mut SecurityCollections,
        scope: &str,
        rows: impl IntoIterator<Item = &'a UserMembershipRow>,
    ) {
        let SecurityCollections {
            memberships,
            memberships_validity,
            ..
        } = collections;
        let target = memberships.entry(scope.to_string()).or_default();

        for row in rows {
            target.insert(normalize(&row.membership_name), row.membership_id);
            record_expiry(
                &mut self.unlimited_memberships,
                memberships_validity,
                row.membership_id,
                row.valid_to,
            );
        }
    }

    /// Merge role rows of one scope. Direct grants land in the site-roles
    /// bucket, membership-derived grants in the membership-roles bucket.
    pub(crate) fn merge_roles<'a>(
        &mut self,
        collections: &mut SecurityCollections,
        scope: &str,
        rows: impl IntoIterator<Item = &'a UserRoleRow>,
    ) {
        let SecurityCollections {
            sites_roles,
            membership_roles,
            roles_validity,
            memberships_validity,
            membership_role_validity,
            ..
        } = collections;

        let direct: &mut NameMap<RoleId> = sites_roles.entry(scope.to_string()).or_default();
        let derived: &mut NameMap<RoleId> = membership_roles.entry(scope.to_string()).or_default();

        for row in rows {
            let membership_id = row.membership_id.filter(|m| m.is_saved());
            let target = if membership_id.is_some() {
                &mut *derived
            } else {
                &mut *direct
            };
            target.insert(normalize(&row.role_name), row.role_id);

            record_expiry(
                &mut self.unlimited_roles,
                roles_validity,
                row.role_id,
                row.valid_to,
            );

            if let Some(membership_id) = membership_id {
                let membership =
                    Validity::from_expiry(memberships_validity.get(&membership_id).copied());
                let merged = match membership_role_validity.get(&row.role_id) {
                    Some(existing) => existing.later(membership),
                    None => membership,
                };
                membership_role_validity.insert(row.role_id, merged);
            }
        }
    }
}

/// Steps 2 and 3 of the row merge: unlimited wins, otherwise keep the latest expiry.
fn record_expiry<I>(
    unlimited: &mut HashSet<I>,
    validity: &mut HashMap<I, DateTime<Utc>>,
    id: I,
    valid_to: Option<DateTime<Utc>>,
) where
    I: Copy + Eq + core::hash::Hash,
{
    match valid_to {
        None => {
            unlimited.insert(id);
            validity.remove(&id);
        }
        Some(_) if unlimited.contains(&id) => {}
        Some(at) => {
            let entry = validity.entry(id).or_insert(at);
            if at > *entry {
                *entry = at;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::collections::GrantState;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn role(name: &str, id: i32, valid_to: Option<DateTime<Utc>>) -> UserRoleRow {
        UserRoleRow {
            role_name: name.to_string(),
            role_id: RoleId::new(id),
            site_id: Some(SiteId::new(1)),
            valid_to,
            membership_id: None,
        }
    }

    fn via(mut row: UserRoleRow, membership: i32) -> UserRoleRow {
        row.membership_id = Some(MembershipId::new(membership));
        row
    }

    fn membership(name: &str, id: i32, valid_to: Option<DateTime<Utc>>) -> UserMembershipRow {
        UserMembershipRow {
            membership_name: name.to_string(),
            membership_id: MembershipId::new(id),
            site_id: Some(SiteId::new(1)),
            valid_to,
        }
    }

    #[test]
    fn unlimited_grant_wins_regardless_of_order() {
        let later = now() + Duration::days(10);
        for rows in [
            vec![role("Editors", 4, None), role("Editors", 4, Some(later))],
            vec![role("Editors", 4, Some(later)), role("Editors", 4, None)],
        ] {
            let mut c = SecurityCollections::empty();
            MergePass::default().merge_roles(&mut c, "acme", &rows);
            assert!(c.roles_validity.get(&RoleId::new(4)).is_none());
        }
    }

    #[test]
    fn latest_bounded_expiry_is_kept() {
        let soon = now() + Duration::days(1);
        let later = now() + Duration::days(5);
        let rows = vec![role("Editors", 4, Some(later)), role("Editors", 4, Some(soon))];
        let mut c = SecurityCollections::empty();
        MergePass::default().merge_roles(&mut c, "acme", &rows);
        assert_eq!(c.roles_validity[&RoleId::new(4)], later);
    }

    #[test]
    fn unlimited_is_shared_across_scopes_in_one_pass() {
        let later = now() + Duration::days(5);
        let mut c = SecurityCollections::empty();
        let mut pass = MergePass::default();
        pass.merge_roles(&mut c, GLOBAL_ROLES_KEY, &[role("Shared", 9, None)]);
        pass.merge_roles(&mut c, "acme", &[role("Shared", 9, Some(later))]);
        assert!(c.roles_validity.get(&RoleId::new(9)).is_none());
    }

    #[test]
    fn membership_role_takes_latest_membership_expiry() {
        let soon = now() + Duration::days(1);
        let later = now() + Duration::days(7);
        let mut c = SecurityCollections::empty();
        let mut pass = MergePass::default();
        pass.merge_memberships(
            &mut c,
            "acme",
            &[membership("Gold", 1, Some(later)), membership("Silver", 2, Some(soon))],
        );
        pass.merge_roles(
            &mut c,
            "acme",
            &[
                via(role("Members", 6, Some(later)), 1),
                via(role("Members", 6, Some(soon)), 2),
            ],
        );

        assert_eq!(
            c.membership_role_validity[&RoleId::new(6)],
            Validity::Until(later)
        );
        assert_eq!(c.membership_role_state("acme", "members", now()), GrantState::Valid);
        assert_eq!(c.role_state("acme", "members", now()), GrantState::Absent);
    }

    #[test]
    fn unlimited_membership_marks_role_unlimited() {
        let soon = now() + Duration::days(1);
        let mut c = SecurityCollections::empty();
        let mut pass = MergePass::default();
        pass.merge_memberships(
            &mut c,
            "acme",
            &[membership("Silver", 2, Some(soon)), membership("Forever", 3, None)],
        );
        pass.merge_roles(
            &mut c,
            "acme",
            &[
                via(role("Members", 6, Some(soon)), 2),
                via(role("Members", 6, None), 3),
                via(role("Members", 6, Some(soon)), 2),
            ],
        );
        assert_eq!(c.membership_role_validity[&RoleId::new(6)], Validity::Unlimited);
    }

    #[test]
    fn membership_validity_uses_same_merge() {
        let soon = now() + Duration::days(1);
        let mut c = SecurityCollections::empty();
        MergePass::default().merge_memberships(
            &mut c,
            "acme",
            &[membership("Gold", 1, Some(soon)), membership("Gold", 1, None)],
        );
        assert!(c.memberships_validity.is_empty());
        assert_eq!(c.membership_state("acme", "GOLD", now()), GrantState::Valid);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: any unlimited row for a role ID removes its expiry.
            #[test]
            fn any_unlimited_row_means_no_expiry(
                offsets in proptest::collection::vec(proptest::option::of(1i64..1000), 1..12)
            ) {
                let rows: Vec<UserRoleRow> = offsets
                    .iter()
                    .map(|o| role("Editors", 4, o.map(|h| now() + Duration::hours(h))))
                    .collect();
                let mut c = SecurityCollections::empty();
                MergePass::default().merge_roles(&mut c, "acme", &rows);

                let any_unlimited = offsets.iter().any(Option::is_none);
                let recorded = c.roles_validity.get(&RoleId::new(4)).copied();
                if any_unlimited {
                    prop_assert!(recorded.is_none());
                } else {
                    let max = offsets.iter().flatten().max().map(|h| now() + Duration::hours(*h));
                    prop_assert_eq!(recorded, max);
                }
            }
        }
    }
}

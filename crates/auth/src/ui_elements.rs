//! Per-user UI-element grants.
//!
//! The map is keyed by scope (lowercased site name or the global key), then by
//! `"resource.element"`, and stores the validity of the grant.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use sitegate_core::RoleId;

use crate::collections::{SecurityCollections, Validity, element_key, scope_key};
use crate::store::UIElementGrantRow;

/// Build the UI-element map from grant rows of the roles the user holds.
///
/// `collections` must already contain the user's role and membership tables.
pub fn build_ui_element_map(
    collections: &SecurityCollections,
    rows: &[UIElementGrantRow],
) -> HashMap<String, HashMap<String, Validity>> {
    let mut map: HashMap<String, HashMap<String, Validity>> = HashMap::new();

    for row in rows {
        let scope = scope_key(row.site_name.as_deref());
        let key = element_key(&row.resource_name, &row.element_name);
        let incoming = row_validity(collections, row.role_id);

        match map.entry(scope).or_default().entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
            Entry::Occupied(mut slot) => {
                let merged = merge_element_validity(*slot.get(), incoming);
                slot.insert(merged);
            }
        }
    }

    map
}

/// Validity the granting role gives an element.
///
/// A directly held role uses its own validity. A role held only through
/// memberships uses the membership-derived validity when that lasts longer.
fn row_validity(collections: &SecurityCollections, role_id: RoleId) -> Validity {
    let own = collections.role_validity(role_id);
    if collections.holds_role_directly(role_id) {
        return own;
    }

    match collections.membership_role_validity().get(&role_id) {
        Some(via_membership) if via_membership.is_broader_than(own) => *via_membership,
        _ => own,
    }
}

/// Merge a second grant of an element into an existing one.
///
/// Two bounded grants keep the later expiry. A bounded grant followed by an
/// unlimited one collapses to the zero time (expired) instead of becoming
/// unlimited.
pub fn merge_element_validity(existing: Validity, incoming: Validity) -> Validity {
    match (existing, incoming) {
        (Validity::Until(a), Validity::Until(b)) => Validity::Until(a.max(b)),
        (Validity::Until(_), Validity::Unlimited) => Validity::expired(),
        (Validity::Unlimited, _) => Validity::Unlimited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use sitegate_core::MembershipId;

    use crate::collections::{GLOBAL_ROLES_KEY, GrantState};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn grant(role: i32, element: &str, site: Option<&str>) -> UIElementGrantRow {
        UIElementGrantRow {
            role_id: RoleId::new(role),
            resource_name: "CMS.Content".to_string(),
            element_name: element.to_string(),
            site_name: site.map(str::to_string),
        }
    }

    fn direct_roles(roles: &[(i32, Option<DateTime<Utc>>)]) -> SecurityCollections {
        let mut c = SecurityCollections::empty();
        for (id, valid_to) in roles {
            c.sites_roles
                .entry("acme".to_string())
                .or_default()
                .insert(format!("role{id}"), RoleId::new(*id));
            if let Some(at) = valid_to {
                c.roles_validity.insert(RoleId::new(*id), *at);
            }
        }
        c
    }

    #[test]
    fn elements_are_scoped_and_lowercased() {
        let c = direct_roles(&[(1, None)]);
        let map = build_ui_element_map(
            &c,
            &[grant(1, "Properties", Some("Acme")), grant(1, "Design", None)],
        );
        assert_eq!(map["acme"]["cms.content.properties"], Validity::Unlimited);
        assert_eq!(map[GLOBAL_ROLES_KEY]["cms.content.design"], Validity::Unlimited);
    }

    #[test]
    fn two_bounded_grants_keep_later_expiry() {
        let soon = now() + Duration::days(1);
        let later = now() + Duration::days(3);
        let c = direct_roles(&[(1, Some(soon)), (2, Some(later))]);
        let map = build_ui_element_map(
            &c,
            &[grant(1, "Properties", Some("acme")), grant(2, "Properties", Some("acme"))],
        );
        assert_eq!(map["acme"]["cms.content.properties"], Validity::Until(later));
    }

    #[test]
    fn bounded_then_unlimited_collapses_to_expired() {
        let soon = now() + Duration::days(1);
        let c = direct_roles(&[(1, Some(soon)), (2, None)]);
        let mut snapshot = c.clone();
        snapshot.ui_elements = build_ui_element_map(
            &c,
            &[grant(1, "Properties", Some("acme")), grant(2, "Properties", Some("acme"))],
        );
        assert_eq!(
            snapshot.ui_element_state("acme", "cms.content.properties", now()),
            GrantState::Expired
        );
    }

    #[test]
    fn unlimited_then_bounded_stays_unlimited() {
        let soon = now() + Duration::days(1);
        let c = direct_roles(&[(1, None), (2, Some(soon))]);
        let map = build_ui_element_map(
            &c,
            &[grant(1, "Properties", Some("acme")), grant(2, "Properties", Some("acme"))],
        );
        assert_eq!(map["acme"]["cms.content.properties"], Validity::Unlimited);
    }

    #[test]
    fn membership_only_role_uses_membership_validity() {
        let soon = now() + Duration::days(2);
        let mut c = SecurityCollections::empty();
        c.membership_roles
            .entry("acme".to_string())
            .or_default()
            .insert("members".to_string(), RoleId::new(8));
        c.roles_validity.insert(RoleId::new(8), now() - Duration::days(1));
        c.membership_role_validity.insert(RoleId::new(8), Validity::Until(soon));
        c.memberships_validity.insert(MembershipId::new(1), soon);

        let map = build_ui_element_map(&c, &[grant(8, "Properties", Some("acme"))]);
        assert_eq!(map["acme"]["cms.content.properties"], Validity::Until(soon));
    }

    #[test]
    fn narrower_membership_validity_does_not_shorten_unlimited_role() {
        let soon = now() + Duration::days(1);
        let mut c = SecurityCollections::empty();
        c.membership_roles
            .entry("acme".to_string())
            .or_default()
            .insert("members".to_string(), RoleId::new(8));
        c.membership_role_validity.insert(RoleId::new(8), Validity::Until(soon));

        let map = build_ui_element_map(&c, &[grant(8, "Properties", Some("acme"))]);
        assert_eq!(c.role_validity(RoleId::new(8)), Validity::Unlimited);
        assert_eq!(map["acme"]["cms.content.properties"], Validity::Unlimited);
    }

    #[test]
    fn direct_role_ignores_membership_validity() {
        let soon = now() + Duration::days(1);
        let mut c = direct_roles(&[(5, Some(soon))]);
        c.membership_role_validity.insert(RoleId::new(5), Validity::Unlimited);

        let map = build_ui_element_map(&c, &[grant(5, "Properties", Some("acme"))]);
        assert_eq!(map["acme"]["cms.content.properties"], Validity::Until(soon));
    }
}

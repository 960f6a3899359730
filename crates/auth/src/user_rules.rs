//! Who may create, modify or delete a user account.
//!
//! The rules guard against privilege escalation: non-global administrators
//! cannot touch other administrators, nobody can make themselves a global
//! administrator, and only editors can create or promote editors. Anything
//! the rules do not settle falls back to the `cms.users` resource permissions.

use tracing::debug;

use crate::PrivilegeLevel;
use crate::decision::{AuthError, Decision, Denial, Granted};
use crate::object::{ResourceAuthorizer, USERS_RESOURCE};
use crate::user::User;

/// Authorize saving `target` (a new account when `is_create`) on behalf of `acting`.
pub fn authorize_set_user_info(
    authorizer: &dyn ResourceAuthorizer,
    acting: &User,
    target: &User,
    is_create: bool,
    site_name: Option<&str>,
) -> Result<Decision, AuthError> {
    let acting_level = acting.privilege_level;
    if acting_level == PrivilegeLevel::GlobalAdmin {
        return Ok(Ok(Granted::GlobalAdministrator));
    }

    let edited_is_or_was_admin = target.is_or_was_admin();
    // Both the loaded and the current ID must match, so swapping the ID
    // mid-edit does not count as editing oneself.
    let self_editing = acting.id.is_saved()
        && target.original_id() == Some(acting.id)
        && target.id == acting.id;

    let decision = if acting_level == PrivilegeLevel::Admin {
        if edited_is_or_was_admin && !self_editing {
            Err(Denial::administrator_required())
        } else if self_editing && target.privilege_level == PrivilegeLevel::GlobalAdmin {
            Err(Denial::self_escalation())
        } else {
            Ok(Granted::Administrator)
        }
    } else if edited_is_or_was_admin {
        Err(Denial::administrator_required())
    } else if self_editing && !target.privilege_level_changed() {
        Ok(Granted::SelfService)
    } else if target.privilege_level == PrivilegeLevel::Editor
        && (target.privilege_level_changed() || target.privilege_level == PrivilegeLevel::Editor)
        && acting_level != PrivilegeLevel::Editor
    {
        Err(Denial::editor_promotion())
    } else {
        let permission = if is_create { "create" } else { "modify" };
        return authorizer.authorize_resource(acting, USERS_RESOURCE, permission, site_name);
    };

    if let Err(denial) = &decision {
        debug!(
            acting_user = %acting.id,
            target_user = %target.id,
            kind = ?denial.kind,
            "user save denied"
        );
    }
    Ok(decision)
}

/// Authorize deleting `target` on behalf of `acting`.
pub fn authorize_delete_user_info(
    authorizer: &dyn ResourceAuthorizer,
    acting: &User,
    target: &User,
    site_name: Option<&str>,
) -> Result<Decision, AuthError> {
    let acting_level = acting.privilege_level;
    // Current ID only: an edited target pointing at the acting account is
    // treated as that account.
    let self_delete = acting.id.is_saved() && target.id == acting.id;

    let decision = if self_delete && acting_level >= PrivilegeLevel::Editor {
        Err(Denial::self_delete())
    } else if acting_level == PrivilegeLevel::GlobalAdmin {
        Ok(Granted::GlobalAdministrator)
    } else if acting_level == PrivilegeLevel::Admin {
        if target.is_or_was_admin() {
            Err(Denial::administrator_required())
        } else {
            Ok(Granted::Administrator)
        }
    } else if target.is_or_was_admin() {
        Err(Denial::administrator_required())
    } else if self_delete {
        Ok(Granted::SelfService)
    } else if target.privilege_level == PrivilegeLevel::Editor
        && acting_level != PrivilegeLevel::Editor
    {
        Err(Denial::editor_promotion())
    } else {
        return authorizer.authorize_resource(acting, USERS_RESOURCE, "delete", site_name);
    };

    if let Err(denial) = &decision {
        debug!(
            acting_user = %acting.id,
            target_user = %target.id,
            kind = ?denial.kind,
            "user delete denied"
        );
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use sitegate_core::UserId;

    use crate::decision::DenialKind;

    /// Grants a fixed set of `cms.users` permissions and records what was asked.
    struct StubAuthorizer {
        granted: Vec<&'static str>,
        asked: RefCell<Vec<String>>,
    }

    impl StubAuthorizer {
        fn granting(granted: &[&'static str]) -> Self {
            Self {
                granted: granted.to_vec(),
                asked: RefCell::new(Vec::new()),
            }
        }
    }

    impl ResourceAuthorizer for StubAuthorizer {
        fn authorize_resource(
            &self,
            _user: &User,
            resource_name: &str,
            permission_name: &str,
            _site_name: Option<&str>,
        ) -> Result<Decision, AuthError> {
            self.asked
                .borrow_mut()
                .push(format!("{resource_name}.{permission_name}"));
            if self.granted.iter().any(|p| *p == permission_name) {
                Ok(Ok(Granted::RoleGrant))
            } else {
                Ok(Err(Denial::missing_permission(resource_name, permission_name)))
            }
        }
    }

    fn user(id: i32, level: PrivilegeLevel) -> User {
        User::loaded(UserId::new(id), format!("user{id}"), level)
    }

    fn kind(decision: Decision) -> Option<DenialKind> {
        decision.err().map(|d| d.kind)
    }

    #[test]
    fn global_admin_may_do_anything() {
        let authz = StubAuthorizer::granting(&[]);
        let acting = user(1, PrivilegeLevel::GlobalAdmin);
        let target = user(2, PrivilegeLevel::GlobalAdmin);
        assert!(authorize_set_user_info(&authz, &acting, &target, false, None).unwrap().is_ok());
        assert!(authorize_delete_user_info(&authz, &acting, &target, None).unwrap().is_ok());
        assert!(authz.asked.borrow().is_empty());
    }

    #[test]
    fn admin_cannot_edit_other_admins() {
        let authz = StubAuthorizer::granting(&["modify"]);
        let acting = user(1, PrivilegeLevel::Admin);
        let target = user(2, PrivilegeLevel::Admin);
        let decision = authorize_set_user_info(&authz, &acting, &target, false, None).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::AdministratorRequired));
    }

    #[test]
    fn admin_cannot_edit_demoted_admin() {
        let authz = StubAuthorizer::granting(&["modify"]);
        let acting = user(1, PrivilegeLevel::Admin);
        let mut target = user(2, PrivilegeLevel::Admin);
        target.privilege_level = PrivilegeLevel::None;
        let decision = authorize_set_user_info(&authz, &acting, &target, false, None).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::AdministratorRequired));
    }

    #[test]
    fn admin_cannot_self_escalate_to_global_admin() {
        let authz = StubAuthorizer::granting(&["modify"]);
        let acting = user(1, PrivilegeLevel::Admin);
        let mut target = user(1, PrivilegeLevel::Admin);
        target.privilege_level = PrivilegeLevel::GlobalAdmin;
        let decision = authorize_set_user_info(&authz, &acting, &target, false, None).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::SelfEscalation));
    }

    #[test]
    fn admin_may_edit_self_and_regular_users() {
        let authz = StubAuthorizer::granting(&[]);
        let acting = user(1, PrivilegeLevel::Admin);
        let mut me = user(1, PrivilegeLevel::Admin);
        me.name = "renamed".to_string();
        assert_eq!(
            authorize_set_user_info(&authz, &acting, &me, false, None).unwrap(),
            Ok(Granted::Administrator)
        );
        let editor = user(5, PrivilegeLevel::Editor);
        assert!(authorize_set_user_info(&authz, &acting, &editor, false, None).unwrap().is_ok());
    }

    #[test]
    fn id_swap_is_not_self_editing() {
        let authz = StubAuthorizer::granting(&["modify"]);
        let acting = user(1, PrivilegeLevel::Admin);
        // Loaded as another admin, then re-pointed at the acting account.
        let mut target = user(2, PrivilegeLevel::Admin);
        target.id = UserId::new(1);
        let decision = authorize_set_user_info(&authz, &acting, &target, false, None).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::AdministratorRequired));
    }

    #[test]
    fn editor_may_edit_own_non_privilege_fields() {
        let authz = StubAuthorizer::granting(&[]);
        let acting = user(3, PrivilegeLevel::Editor);
        let mut me = user(3, PrivilegeLevel::Editor);
        me.enabled = false;
        assert_eq!(
            authorize_set_user_info(&authz, &acting, &me, false, None).unwrap(),
            Ok(Granted::SelfService)
        );
    }

    #[test]
    fn non_editor_cannot_promote_to_editor() {
        let authz = StubAuthorizer::granting(&["modify", "create"]);
        let acting = user(4, PrivilegeLevel::None);
        let mut target = user(9, PrivilegeLevel::None);
        target.privilege_level = PrivilegeLevel::Editor;
        let decision = authorize_set_user_info(&authz, &acting, &target, false, None).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::EditorPromotion));

        let new_editor =
            User::new(UserId::unsaved(), "fresh").with_privilege_level(PrivilegeLevel::Editor);
        let decision = authorize_set_user_info(&authz, &acting, &new_editor, true, None).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::EditorPromotion));
    }

    #[test]
    fn non_admin_cannot_touch_admins_even_when_self_editing() {
        let authz = StubAuthorizer::granting(&["modify"]);
        let acting = user(4, PrivilegeLevel::Editor);
        let mut target = user(4, PrivilegeLevel::Editor);
        target.privilege_level = PrivilegeLevel::Admin;
        let decision = authorize_set_user_info(&authz, &acting, &target, false, None).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::AdministratorRequired));
    }

    #[test]
    fn remaining_cases_fall_back_to_resource_permission() {
        let authz = StubAuthorizer::granting(&["create"]);
        let acting = user(4, PrivilegeLevel::Editor);
        let fresh = User::new(UserId::unsaved(), "fresh");
        let decision =
            authorize_set_user_info(&authz, &acting, &fresh, true, Some("acme")).unwrap();
        assert!(decision.is_ok());

        let other = user(8, PrivilegeLevel::None);
        let decision =
            authorize_set_user_info(&authz, &acting, &other, false, Some("acme")).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::MissingPermission));
        assert_eq!(
            *authz.asked.borrow(),
            vec!["cms.users.create".to_string(), "cms.users.modify".to_string()]
        );
    }

    #[test]
    fn editor_cannot_delete_self() {
        let authz = StubAuthorizer::granting(&["delete"]);
        let acting = user(3, PrivilegeLevel::Editor);
        let me = user(3, PrivilegeLevel::Editor);
        let decision = authorize_delete_user_info(&authz, &acting, &me, None).unwrap();
        assert_eq!(kind(decision), Some(DenialKind::SelfDelete));
    }

    #[test]
    fn plain_user_may_delete_self() {
        let authz = StubAuthorizer::granting(&[]);
        let acting = user(3, PrivilegeLevel::None);
        let me = user(3, PrivilegeLevel::None);
        assert_eq!(
            authorize_delete_user_info(&authz, &acting, &me, None).unwrap(),
            Ok(Granted::SelfService)
        );
    }

    #[test]
    fn admin_cannot_delete_admins_or_self() {
        let authz = StubAuthorizer::granting(&["delete"]);
        let acting = user(1, PrivilegeLevel::Admin);
        let other_admin = user(2, PrivilegeLevel::GlobalAdmin);
        assert_eq!(
            kind(authorize_delete_user_info(&authz, &acting, &other_admin, None).unwrap()),
            Some(DenialKind::AdministratorRequired)
        );

        // Loaded as the acting admin, re-pointed elsewhere: still an admin target.
        let mut swapped = user(1, PrivilegeLevel::Admin);
        swapped.id = UserId::new(2);
        assert_eq!(
            kind(authorize_delete_user_info(&authz, &acting, &swapped, None).unwrap()),
            Some(DenialKind::AdministratorRequired)
        );

        let me = user(1, PrivilegeLevel::Admin);
        assert_eq!(
            kind(authorize_delete_user_info(&authz, &acting, &me, None).unwrap()),
            Some(DenialKind::SelfDelete)
        );

        let regular = user(5, PrivilegeLevel::None);
        assert!(authorize_delete_user_info(&authz, &acting, &regular, None).unwrap().is_ok());
    }

    #[test]
    fn delete_falls_back_to_resource_permission() {
        let authz = StubAuthorizer::granting(&["delete"]);
        let acting = user(3, PrivilegeLevel::Editor);
        let target = user(9, PrivilegeLevel::Editor);
        assert!(authorize_delete_user_info(&authz, &acting, &target, None).unwrap().is_ok());

        let acting = user(4, PrivilegeLevel::None);
        assert_eq!(
            kind(authorize_delete_user_info(&authz, &acting, &target, None).unwrap()),
            Some(DenialKind::EditorPromotion)
        );
    }
}
